//! Test doubles shared by the unit tests of this crate.
//!
//! Time is virtual: [`VirtualDelay`] advances a [`World`] clock and delivers
//! any driver events scheduled up to the new instant, so timeouts and ticks
//! run without sleeping.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::{HashMap, VecDeque};
use std::string::String;
use std::vec::Vec;

use embassy_futures::yield_now;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorType, Read, Write};
use rand_core::RngCore;

use crate::config::{Endpoint, NetworkCredentials};
use crate::link::{LinkDriver, LinkEvent, LinkState};
use crate::session::{PublishError, QoS, SessionDriver, SessionState};
use crate::store::{CredentialStore, StoreError};

/// Serial port fed from a fixed script; reads return 0 once it runs dry.
pub struct ScriptedSerial {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl ScriptedSerial {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl ErrorType for ScriptedSerial {
    type Error = Infallible;
}

impl Read for ScriptedSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match (buf.first_mut(), self.input.pop_front()) {
            (Some(slot), Some(byte)) => {
                *slot = byte;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl Write for ScriptedSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// In-memory credential store that records every access.
#[derive(Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    loads: RefCell<Vec<String>>,
    writes: Vec<(String, String)>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        self.loads.borrow().clone()
    }

    /// Every successful write, in order
    pub fn writes(&self) -> &[(String, String)] {
        &self.writes
    }

    pub fn written_keys(&self) -> Vec<&str> {
        self.writes.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl CredentialStore for MemoryStore {
    fn store(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::WriteFailed);
        }
        self.values.insert(key.into(), value.into());
        self.writes.push((key.into(), value.into()));
        Ok(())
    }

    fn load<const N: usize>(&self, key: &str) -> Result<heapless::String<N>, StoreError> {
        self.loads.borrow_mut().push(key.into());
        let value = self.values.get(key).ok_or(StoreError::NotFound)?;
        if value.len() > N {
            return Err(StoreError::TooLarge);
        }
        heapless::String::try_from(value.as_str()).map_err(|_| StoreError::TooLarge)
    }
}

/// Virtual clock plus the status cells drivers report into.
#[derive(Default)]
pub struct World {
    pub link_state: LinkState,
    pub session_state: SessionState,
    now_ms: Cell<u64>,
    scheduled: RefCell<Vec<(u64, LinkEvent)>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    pub fn schedule_link(&self, after_ms: u64, event: LinkEvent) {
        self.scheduled
            .borrow_mut()
            .push((self.now_ms() + after_ms, event));
    }

    pub fn cancel_link_events(&self) {
        self.scheduled.borrow_mut().clear();
    }

    /// Move the clock forward, delivering due events in time order.
    pub fn advance(&self, ms: u64) {
        let target = self.now_ms() + ms;
        loop {
            let next = {
                let mut scheduled = self.scheduled.borrow_mut();
                let due = scheduled
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _))| *at <= target)
                    .min_by_key(|(_, (at, _))| *at)
                    .map(|(i, _)| i);
                due.map(|i| scheduled.remove(i))
            };
            match next {
                Some((at, event)) => {
                    self.now_ms.set(at.max(self.now_ms()));
                    self.link_state.on_event(event);
                }
                None => break,
            }
        }
        self.now_ms.set(target);
    }
}

pub struct VirtualDelay<'w> {
    world: &'w World,
}

impl<'w> VirtualDelay<'w> {
    pub fn new(world: &'w World) -> Self {
        Self { world }
    }
}

// Each delay yields once after advancing so that futures raced against it
// (see `select` in the tests) get polled.
impl DelayNs for VirtualDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.world.advance(u64::from(ns).div_ceil(1_000_000));
        yield_now().await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.world.advance(u64::from(us).div_ceil(1_000));
        yield_now().await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.world.advance(u64::from(ms));
        yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Begin(String),
    Connect,
    Stop,
}

/// Link driver whose connect outcomes are scripted per attempt.
///
/// Each `connect` pops the next outcome: `Some(ms)` reports an address after
/// `ms`, `None` never comes up. An exhausted script never comes up either.
pub struct ScriptedLink<'w> {
    world: &'w World,
    outcomes: VecDeque<Option<u64>>,
    calls: Vec<LinkCall>,
}

impl<'w> ScriptedLink<'w> {
    pub fn new(world: &'w World, outcomes: &[Option<u64>]) -> Self {
        Self {
            world,
            outcomes: outcomes.iter().copied().collect(),
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[LinkCall] {
        &self.calls
    }

    pub fn connect_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == LinkCall::Connect).count()
    }

    pub fn stop_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == LinkCall::Stop).count()
    }
}

impl LinkDriver for ScriptedLink<'_> {
    fn begin(&mut self, credentials: &NetworkCredentials) {
        self.calls.push(LinkCall::Begin(credentials.id.as_str().into()));
        self.world.schedule_link(0, LinkEvent::Started);
    }

    fn connect(&mut self) {
        self.calls.push(LinkCall::Connect);
        if let Some(Some(latency)) = self.outcomes.pop_front() {
            self.world.schedule_link(latency, LinkEvent::GotAddress);
        }
    }

    fn stop(&mut self) {
        self.calls.push(LinkCall::Stop);
        self.world.cancel_link_events();
        self.world.link_state.on_event(LinkEvent::Disconnected);
    }

    fn is_up(&self) -> bool {
        self.world.link_state.is_up()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Session driver that records starts and publishes.
#[derive(Default)]
pub struct ScriptedSession {
    endpoints: Vec<String>,
    published: Vec<Published>,
    fail_publishes: bool,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&mut self, fail: bool) {
        self.fail_publishes = fail;
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn published(&self) -> &[Published] {
        &self.published
    }
}

impl SessionDriver for ScriptedSession {
    type Handle = usize;

    fn start(&mut self, endpoint: &Endpoint) -> Self::Handle {
        self.endpoints.push(endpoint.as_str().into());
        self.endpoints.len()
    }

    async fn publish(
        &mut self,
        _handle: &Self::Handle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if self.fail_publishes {
            return Err(PublishError::Transport);
        }
        self.published.push(Published {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }
}

/// Deterministic RNG that cycles through a fixed list of values.
pub struct SequenceRng {
    values: Vec<u32>,
    next: usize,
}

impl SequenceRng {
    pub fn new(values: &[u32]) -> Self {
        Self {
            values: values.to_vec(),
            next: 0,
        }
    }
}

impl RngCore for SequenceRng {
    fn next_u32(&mut self) -> u32 {
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for byte in dst {
            *byte = self.next_u32() as u8;
        }
    }
}
