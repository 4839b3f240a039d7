//! ESP32-C3 firmware-specific modules for SmartPlug Pro
//!
//! This crate contains the code that cannot compile on desktop targets:
//! GPIO and flash setup, the WiFi radio, the TCP/IP stack, and the embassy
//! tasks that bind them to the controller in `smartplug_core`.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod net;
pub mod tasks;
pub mod wifi_secrets;
