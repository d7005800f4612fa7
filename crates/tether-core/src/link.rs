//! Network link contract and status mirroring
//!
//! The link driver runs on its own and reports progress only through
//! [`LinkEvent`]s. Event handlers mirror those into a [`LinkState`], which the
//! foreground flow polls. Handlers do nothing else: no I/O, no retries.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::NetworkCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkStatus {
    Down = 0,
    Connecting = 1,
    Up = 2,
}

impl LinkStatus {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Up,
            _ => Self::Down,
        }
    }
}

/// Asynchronous notifications from a link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The driver is ready and begins associating
    Started,
    /// Association was lost or refused
    Disconnected,
    /// An address was obtained; the link is usable
    GotAddress,
}

/// Link status shared between driver event handlers and the foreground flow.
///
/// Single-word atomic with relaxed ordering: readers only need the update to
/// become visible within one poll interval, never a torn value.
#[derive(Debug)]
pub struct LinkState {
    status: AtomicU8,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(LinkStatus::Down as u8),
        }
    }

    pub fn get(&self) -> LinkStatus {
        LinkStatus::from_raw(self.status.load(Ordering::Relaxed))
    }

    pub fn set(&self, status: LinkStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn is_up(&self) -> bool {
        self.get() == LinkStatus::Up
    }

    /// Mirror a driver event. Safe to call from any event-delivery context.
    pub fn on_event(&self, event: LinkEvent) {
        let status = match event {
            LinkEvent::Started => LinkStatus::Connecting,
            LinkEvent::Disconnected => LinkStatus::Down,
            LinkEvent::GotAddress => LinkStatus::Up,
        };
        self.set(status);
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract for the driver that owns the network link.
///
/// Every method returns immediately; outcomes are observed through
/// [`LinkEvent`]s delivered to the node's [`LinkState`].
pub trait LinkDriver {
    /// Configure the driver with `credentials` and start it.
    fn begin(&mut self, credentials: &NetworkCredentials);

    /// Request association with the configured network. Idempotent.
    fn connect(&mut self);

    /// Stop the driver and drop any half-established association.
    fn stop(&mut self);

    fn is_up(&self) -> bool;
}
