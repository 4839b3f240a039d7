//! Device configuration: network credentials, broker settings, plug behavior

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::metering::Hlw8012Calibration;
use crate::relay::PowerOnBehavior;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_PREFIX: &str = "smartplug";
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
pub const DEFAULT_REPORT_INTERVAL_SECS: u16 = 30;
pub const DEFAULT_MAX_CURRENT_MA: u32 = 10_000;

pub const REPORT_INTERVAL_RANGE_SECS: core::ops::RangeInclusive<u16> = 5..=3600;
pub const MAX_CURRENT_RANGE_MA: core::ops::RangeInclusive<u32> = 100..=16_000;
pub const KEEP_ALIVE_RANGE_SECS: core::ops::RangeInclusive<u16> = 10..=600;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} is too long")]
    TooLong(&'static str),
    #[error("{0} is out of range")]
    InvalidValue(&'static str),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub username: heapless::String<32>,
    pub password: heapless::String<64>,
    pub topic_prefix: heapless::String<32>,
    pub keep_alive_secs: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        let mut topic_prefix = heapless::String::new();
        let _ = topic_prefix.push_str(DEFAULT_TOPIC_PREFIX);
        Self {
            host: heapless::String::new(),
            port: DEFAULT_MQTT_PORT,
            username: heapless::String::new(),
            password: heapless::String::new(),
            topic_prefix,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlugSettings {
    pub power_on: PowerOnBehavior,
    pub report_interval_secs: u16,
    pub max_current_ma: u32,
    pub calibration: Hlw8012Calibration,
}

impl Default for PlugSettings {
    fn default() -> Self {
        Self {
            power_on: PowerOnBehavior::default(),
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            max_current_ma: DEFAULT_MAX_CURRENT_MA,
            calibration: Hlw8012Calibration::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub plug: PlugSettings,
}

/// Values baked in at compile time (see the firmware build script)
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildEnv<'a> {
    pub wifi_ssid: &'a str,
    pub wifi_password: &'a str,
    pub mqtt_host: &'a str,
    pub mqtt_port: &'a str,
    pub mqtt_username: &'a str,
    pub mqtt_password: &'a str,
    pub topic_prefix: &'a str,
}

fn bounded<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<heapless::String<N>, ConfigError> {
    let mut out = heapless::String::new();
    out.push_str(value).map_err(|_| ConfigError::TooLong(field))?;
    Ok(out)
}

impl DeviceConfig {
    /// Build the factory configuration from compile-time values.
    ///
    /// Empty port and prefix fall back to the defaults.
    pub fn from_build_env(env: &BuildEnv<'_>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.wifi.ssid = bounded("wifi ssid", env.wifi_ssid)?;
        config.wifi.password = bounded("wifi password", env.wifi_password)?;
        config.mqtt.host = bounded("mqtt host", env.mqtt_host)?;
        config.mqtt.username = bounded("mqtt username", env.mqtt_username)?;
        config.mqtt.password = bounded("mqtt password", env.mqtt_password)?;

        if !env.mqtt_port.is_empty() {
            config.mqtt.port = env
                .mqtt_port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("mqtt port"))?;
        }
        if !env.topic_prefix.is_empty() {
            config.mqtt.topic_prefix = bounded("topic prefix", env.topic_prefix)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi.ssid.is_empty() {
            return Err(ConfigError::Empty("wifi ssid"));
        }
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Empty("mqtt host"));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidValue("mqtt port"));
        }
        if self.mqtt.topic_prefix.is_empty() {
            return Err(ConfigError::Empty("topic prefix"));
        }
        // Wildcards in the prefix would turn every topic into a filter
        if self.mqtt.topic_prefix.contains(['+', '#']) {
            return Err(ConfigError::InvalidValue("topic prefix"));
        }
        if !KEEP_ALIVE_RANGE_SECS.contains(&self.mqtt.keep_alive_secs) {
            return Err(ConfigError::InvalidValue("keep alive"));
        }
        if !REPORT_INTERVAL_RANGE_SECS.contains(&self.plug.report_interval_secs) {
            return Err(ConfigError::InvalidValue("report interval"));
        }
        if !MAX_CURRENT_RANGE_MA.contains(&self.plug.max_current_ma) {
            return Err(ConfigError::InvalidValue("max current"));
        }
        Ok(())
    }
}
