//! Hardware-independent core of the tether sensor node
//!
//! Everything that decides what the node does lives here: the persisted
//! configuration and its store, the operator console, the boot-time
//! provisioning state machine, and the steady-state publish loop. Radios,
//! messaging clients and storage media are reached through small traits so
//! the same logic runs on the ESP32-S3 firmware, in the desktop simulator,
//! and under host tests.
//!
//! It is `#![no_std]` without an allocator; every buffer is a bounded
//! `heapless` type.

#![cfg_attr(not(test), no_std)]

pub mod agent;
pub mod config;
pub mod console;
pub mod link;
pub mod provisioning;
pub mod readings;
pub mod session;
pub mod steady_state;
pub mod store;

#[cfg(test)]
mod testing;
