//! ESP32-S3 firmware-specific modules for tether
//!
//! This crate contains the hardware side of the node that cannot compile on
//! desktop targets: peripheral bring-up, the Wi-Fi station and MQTT tasks
//! behind the core's driver traits, the UART console and the hardware RNG.

#![no_std]

pub mod hardware;
pub mod link;
pub mod rng;
pub mod serial;
pub mod session;
