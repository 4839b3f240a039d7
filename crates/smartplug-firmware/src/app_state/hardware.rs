//! Board wiring and peripheral setup for the SmartPlug Pro
//!
//! Pin map (ESP32-C3):
//! - GPIO4: relay driver, active high
//! - GPIO3: status LED, active low
//! - GPIO9: push button to ground (the boot strap button)
//! - GPIO6 / GPIO7: HLW8012 CF / CF1 pulse outputs
//! - GPIO10: HLW8012 SEL

use esp_hal::efuse::Efuse;
use esp_hal::gpio::{Input, InputConfig, InputPin, Level, Output, OutputConfig, OutputPin, Pull};
use esp_storage::FlashStorage;
use log::info;
use smartplug_core::DeviceId;
use smartplug_core::relay::{Relay, RelayState};
use smartplug_core::storage::FlashSettingsStore;

/// Settings sector: the start of the default `nvs` partition
pub const SETTINGS_FLASH_OFFSET: u32 = 0x9000;

pub const RELAY_ACTIVE_HIGH: bool = true;
pub const LED_ACTIVE_LOW: bool = true;

pub type PlugRelay = Relay<Output<'static>>;
pub type PlugSettingsStore = FlashSettingsStore<FlashStorage<'static>>;

/// HLW8012 connections
pub struct MeterPins {
    pub cf: Input<'static>,
    pub cf1: Input<'static>,
    pub sel: Output<'static>,
}

/// Drive the relay to `initial` straight away; the output is configured
/// with the matching level so the load never glitches.
pub fn init_relay(pin: impl OutputPin + 'static, initial: RelayState) -> PlugRelay {
    let level = Level::from(initial.is_on() == RELAY_ACTIVE_HIGH);
    let output = Output::new(pin, level, OutputConfig::default());
    let Ok(relay) = Relay::new(output, RELAY_ACTIVE_HIGH, initial);
    info!("Relay initialized {:?}", initial);
    relay
}

pub fn init_led(pin: impl OutputPin + 'static) -> Output<'static> {
    // Start dark
    Output::new(pin, Level::from(LED_ACTIVE_LOW), OutputConfig::default())
}

pub fn init_button(pin: impl InputPin + 'static) -> Input<'static> {
    Input::new(pin, InputConfig::default().with_pull(Pull::Up))
}

pub fn init_meter(
    cf: impl InputPin + 'static,
    cf1: impl InputPin + 'static,
    sel: impl OutputPin + 'static,
) -> MeterPins {
    MeterPins {
        cf: Input::new(cf, InputConfig::default()),
        cf1: Input::new(cf1, InputConfig::default()),
        sel: Output::new(sel, Level::Low, OutputConfig::default()),
    }
}

pub fn init_settings_store(flash: esp_hal::peripherals::FLASH<'static>) -> PlugSettingsStore {
    FlashSettingsStore::new(FlashStorage::new(flash), SETTINGS_FLASH_OFFSET)
}

/// Device id from the factory MAC address
pub fn device_id() -> DeviceId {
    DeviceId::from_mac(Efuse::mac_address())
}
