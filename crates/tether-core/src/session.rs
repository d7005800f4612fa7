//! Messaging session contract and status mirroring

use core::sync::atomic::{AtomicBool, Ordering};

use thiserror_no_std::Error;

use crate::config::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Down,
    Up,
}

/// Asynchronous notifications from a session driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Up,
    Down,
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    #[error("session is not connected")]
    NotConnected,
    #[error("broker rejected the publish")]
    Rejected,
    #[error("transport error")]
    Transport,
}

/// Session status shared between driver event handlers and the steady-state loop
#[derive(Debug)]
pub struct SessionState {
    up: AtomicBool,
}

impl SessionState {
    pub const fn new() -> Self {
        Self {
            up: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> SessionStatus {
        if self.is_up() {
            SessionStatus::Up
        } else {
            SessionStatus::Down
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    /// Mirror a driver event. Safe to call from any event-delivery context.
    pub fn on_event(&self, event: SessionEvent) {
        self.up.store(matches!(event, SessionEvent::Up), Ordering::Relaxed);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract for the publish-capable messaging client.
///
/// `start` returns at once; connection progress and later losses arrive as
/// [`SessionEvent`]s. Reconnecting after a loss is the driver's own job.
pub trait SessionDriver {
    type Handle;

    fn start(&mut self, endpoint: &Endpoint) -> Self::Handle;

    fn publish(
        &mut self,
        handle: &Self::Handle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), PublishError>>;
}
