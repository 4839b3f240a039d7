//! Firmware-specific application state extensions
//!
//! Re-exports the hardware-independent app state from `smartplug_core` and
//! adds the board wiring and peripheral setup.

mod hardware;

pub use hardware::*;

// Re-export all shared app state types from smartplug-core
pub use smartplug_core::app_state::*;
