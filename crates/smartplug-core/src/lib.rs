//! Hardware-independent core library for the SmartPlug Pro firmware
//!
//! This crate contains all platform-agnostic logic for the smart plug:
//! relay and protection state machines, power metering math, the MQTT
//! codec and client session, command parsing, telemetry payloads, and the
//! flash record format for persisted settings.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! the ESP32-C3 target and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod app_state;
pub mod button;
pub mod commands;
pub mod config;
pub mod identity;
pub mod led;
pub mod metering;
pub mod mqtt;
pub mod plug;
pub mod protection;
pub mod reconnect;
pub mod relay;
pub mod storage;
pub mod telemetry;

pub use identity::{DeviceId, FIRMWARE_NAME, FIRMWARE_VERSION, banner};
