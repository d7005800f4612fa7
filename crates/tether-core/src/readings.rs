//! Reading source for the steady-state publisher

use core::fmt::Write as _;

use heapless::String;
use rand_core::RngCore;

/// Upper bound (exclusive) of a reading
pub const READING_RANGE: u32 = 100;

/// A reading in `0..100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reading(u8);

impl Reading {
    pub const fn new(value: u8) -> Option<Self> {
        if (value as u32) < READING_RANGE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Decimal ASCII payload
    pub fn to_payload(self) -> String<3> {
        let mut payload = String::new();
        // Any u8 fits in three digits
        let _ = write!(payload, "{}", self.0);
        payload
    }
}

pub trait ReadingSource {
    fn next_reading(&mut self) -> Reading;
}

impl<T: ReadingSource + ?Sized> ReadingSource for &mut T {
    fn next_reading(&mut self) -> Reading {
        (**self).next_reading()
    }
}

/// Uniformly distributed readings drawn from a random number generator.
///
/// Uses rejection sampling: plain `% 100` would favour the low values.
pub struct UniformReadings<R> {
    rng: R,
}

impl<R: RngCore> UniformReadings<R> {
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore> ReadingSource for UniformReadings<R> {
    fn next_reading(&mut self) -> Reading {
        let zone = u32::MAX - (u32::MAX % READING_RANGE);
        loop {
            let raw = self.rng.next_u32();
            if raw < zone {
                return Reading((raw % READING_RANGE) as u8);
            }
        }
    }
}
