//! Credential persistence
//!
//! A [`CredentialStore`] is a flat key/value medium for short configuration
//! strings. Writes are durable once `store` returns, but there is no grouping
//! across keys: a power cut between two writes leaves a partial record behind.
//! Callers therefore re-validate the full [`Configuration`] on every boot.

pub mod sd_card;

use heapless::String;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::{
    BROKER_MAX_LEN, Configuration, KEY_BROKER, KEY_NETWORK_ID, KEY_SECRET, KEY_TOPIC,
    NETWORK_ID_MAX_LEN, NetworkCredentials, SECRET_MAX_LEN, Secret, TOPIC_MAX_LEN,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("stored value exceeds the destination capacity")]
    TooLarge,
    #[error("write to the storage medium failed")]
    WriteFailed,
    #[error("storage medium error")]
    Medium,
}

/// Key/value persistence for configuration strings.
pub trait CredentialStore {
    /// Write `value` under `key`. The value is durable once this returns `Ok`.
    fn store(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read the value stored under `key`.
    ///
    /// A value longer than `N` bytes is reported as [`StoreError::TooLarge`],
    /// never truncated.
    fn load<const N: usize>(&self, key: &str) -> Result<String<N>, StoreError>;
}

/// Which key stopped a configuration load, and why
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("loading '{key}' failed: {error}")]
pub struct LoadFailure {
    pub key: &'static str,
    pub error: StoreError,
}

fn load_field<S: CredentialStore, const N: usize>(
    store: &S,
    key: &'static str,
) -> Result<String<N>, LoadFailure> {
    match store.load::<N>(key) {
        Ok(value) if value.is_empty() => Err(LoadFailure {
            key,
            error: StoreError::NotFound,
        }),
        Ok(value) => Ok(value),
        Err(error) => Err(LoadFailure { key, error }),
    }
}

/// Load all four configuration fields, in key order.
///
/// Stops at the first key that is missing, empty or oversized; nothing from a
/// partial record is returned.
pub fn load_configuration<S: CredentialStore>(store: &S) -> Result<Configuration, LoadFailure> {
    let id = load_field::<S, NETWORK_ID_MAX_LEN>(store, KEY_NETWORK_ID)?;
    let secret = load_field::<S, SECRET_MAX_LEN>(store, KEY_SECRET)?;
    let broker = load_field::<S, BROKER_MAX_LEN>(store, KEY_BROKER)?;
    let topic = load_field::<S, TOPIC_MAX_LEN>(store, KEY_TOPIC)?;

    debug!("Loaded configuration for network '{}'", id);

    Ok(Configuration {
        network: NetworkCredentials {
            id,
            secret: Secret::new(secret),
        },
        broker,
        topic,
    })
}

/// Store one value, logging instead of failing.
///
/// A failed write must not strand the node in the wizard; it is surfaced as a
/// warning and the flow carries on. Returns whether the write succeeded.
pub fn persist<S: CredentialStore>(store: &mut S, key: &str, value: &str) -> bool {
    match store.store(key, value) {
        Ok(()) => {
            debug!("Persisted '{}'", key);
            true
        }
        Err(e) => {
            warn!("Failed to persist '{}': {}", key, e);
            false
        }
    }
}

/// Persist the network half of a configuration
pub fn persist_network<S: CredentialStore>(store: &mut S, network: &NetworkCredentials) {
    persist(store, KEY_NETWORK_ID, &network.id);
    persist(store, KEY_SECRET, network.secret.as_str());
}

/// Persist the broker half of a configuration
pub fn persist_broker<S: CredentialStore>(store: &mut S, broker: &str, topic: &str) {
    persist(store, KEY_BROKER, broker);
    persist(store, KEY_TOPIC, topic);
}
