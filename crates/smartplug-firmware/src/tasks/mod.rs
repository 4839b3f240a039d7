//! Embassy tasks. Each owns its peripherals and talks to the controller
//! through the channels in `smartplug_core::app_state`.

mod button;
mod control;
mod led;
mod meter;
mod mqtt;
mod wifi;

pub use button::button_task;
pub use control::control_task;
pub use led::led_task;
pub use meter::meter_task;
pub use mqtt::mqtt_task;
pub use wifi::{net_task, wifi_task};

/// Milliseconds since boot, the controller's clock
pub(crate) fn now_ms() -> u64 {
    embassy_time::Instant::now().as_millis()
}
