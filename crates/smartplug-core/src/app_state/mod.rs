//! Application-wide state, channels, and error types for SmartPlug

use core::fmt;
use core::str::FromStr;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use thiserror_no_std::Error;

use crate::led::LedPattern;
use crate::plug::{Outbound, PlugInput};
use crate::relay::RelayState;

/// Capacity of the controller input queue
pub const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Capacity of the MQTT outbound queue.
/// A reconnect republishes relay, info, and fault at once.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 8;

/// Inputs for the plug controller (button, meter, MQTT commands)
pub static CONTROL_CHANNEL: Channel<CriticalSectionRawMutex, PlugInput, CONTROL_CHANNEL_CAPACITY> =
    Channel::new();

/// Messages the controller wants published on the broker
pub static OUTBOUND_CHANNEL: Channel<CriticalSectionRawMutex, Outbound, OUTBOUND_CHANNEL_CAPACITY> =
    Channel::new();

/// Latest run state, consumed by the LED task
pub static RUN_STATE_SIGNAL: Signal<CriticalSectionRawMutex, AppRunState> = Signal::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Booting,
    WifiConnecting,
    WifiConnected,
    MqttConnecting,
    Online,
    Error,
}

impl AppRunState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::WifiConnecting => "wifi-connecting",
            Self::WifiConnected => "wifi-connected",
            Self::MqttConnecting => "mqtt-connecting",
            Self::Online => "online",
            Self::Error => "error",
        }
    }
}

/// Main application state container
///
/// Connection status shared between the network tasks, plus a mirror of
/// the relay and fault latch for the LED. The controller task owns the
/// real relay.
#[derive(Debug)]
pub struct AppState {
    pub run_state: AppRunState,
    pub wifi_connected: bool,
    pub mqtt_connected: bool,
    pub ipv4: Option<[u8; 4]>,
    pub relay: RelayState,
    pub tripped: bool,
    /// Most recent failure reported by a task
    pub last_error: Option<AppError>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Create a new booting app state
    pub const fn new() -> Self {
        Self {
            run_state: AppRunState::Booting,
            wifi_connected: false,
            mqtt_connected: false,
            ipv4: None,
            relay: RelayState::Off,
            tripped: false,
            last_error: None,
        }
    }

    /// Record a run state change and notify the LED task
    pub fn set_run_state(&mut self, run_state: AppRunState) {
        if self.run_state != run_state {
            log::info!(
                "Run state: {} -> {}",
                self.run_state.label(),
                run_state.label()
            );
        }
        self.run_state = run_state;
        RUN_STATE_SIGNAL.signal(run_state);
    }

    pub fn set_wifi_connected(&mut self, connected: bool) {
        self.wifi_connected = connected;
        if !connected {
            self.mqtt_connected = false;
            self.ipv4 = None;
            self.set_run_state(AppRunState::WifiConnecting);
        } else if self.run_state == AppRunState::WifiConnecting
            || self.run_state == AppRunState::Booting
        {
            self.set_run_state(AppRunState::WifiConnected);
        }
    }

    pub fn set_mqtt_connected(&mut self, connected: bool) {
        self.mqtt_connected = connected;
        if connected {
            self.set_run_state(AppRunState::Online);
        } else if self.wifi_connected {
            self.set_run_state(AppRunState::MqttConnecting);
        }
    }

    pub fn set_plug_status(&mut self, relay: RelayState, tripped: bool) {
        self.relay = relay;
        self.tripped = tripped;
    }

    /// Keep `error` as the latest failure, for the heartbeat log
    pub fn record_error(&mut self, error: AppError) {
        log::warn!("{}", error);
        self.last_error = Some(error);
    }

    pub fn led_pattern(&self) -> LedPattern {
        LedPattern::for_state(self.run_state, self.relay, self.tripped)
    }
}

pub type GlobalStateType = AsyncMutex<CriticalSectionRawMutex, AppState>;

/// Shared connection state
pub static APP_STATE: GlobalStateType = AsyncMutex::new(AppState::new());

pub type ErrorText = heapless::String<64>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Wifi(ErrorText),
    #[error("MQTT session failed: {0}")]
    Mqtt(ErrorText),
    #[error("Settings storage error: {0}")]
    Storage(ErrorText),
}

/// Render an error message, truncated to fit [`ErrorText`]
pub fn describe(args: fmt::Arguments<'_>) -> ErrorText {
    let text = alloc::fmt::format(args);
    ErrorText::from_unchecked(text.as_str())
}

pub trait FromUnchecked<T> {
    fn from_unchecked(value: T) -> Self;
}

impl<'a, const N: usize> FromUnchecked<&'a str> for heapless::String<N> {
    /// Truncates at a char boundary instead of failing
    fn from_unchecked(value: &'a str) -> Self {
        if let Ok(s) = heapless::String::<N>::from_str(value) {
            return s;
        }
        let mut end = N.min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        heapless::String::<N>::from_str(&value[..end]).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_transitions() {
        let mut state = AppState::new();
        state.set_run_state(AppRunState::WifiConnecting);
        state.set_wifi_connected(true);
        assert_eq!(state.run_state, AppRunState::WifiConnected);

        state.set_mqtt_connected(true);
        assert_eq!(state.run_state, AppRunState::Online);

        state.set_mqtt_connected(false);
        assert_eq!(state.run_state, AppRunState::MqttConnecting);

        state.set_mqtt_connected(true);
        state.set_wifi_connected(false);
        assert_eq!(state.run_state, AppRunState::WifiConnecting);
        assert!(!state.mqtt_connected);
    }

    #[test]
    fn test_led_pattern_follows_plug_status() {
        let mut state = AppState::new();
        state.set_wifi_connected(true);
        state.set_mqtt_connected(true);
        state.set_plug_status(RelayState::On, false);
        assert_eq!(state.led_pattern(), LedPattern::Solid);

        state.set_plug_status(RelayState::Off, true);
        assert_eq!(state.led_pattern(), LedPattern::DoubleBlink);
    }

    #[test]
    fn test_record_error_keeps_latest() {
        let mut state = AppState::new();
        state.record_error(AppError::Wifi(describe(format_args!("{:?}", "Timeout"))));
        state.record_error(AppError::Storage(describe(format_args!("code {}", 3))));
        assert_eq!(
            state.last_error,
            Some(AppError::Storage(ErrorText::from_unchecked("code 3")))
        );
    }

    #[test]
    fn test_describe_truncates_long_messages() {
        let long = "x".repeat(100);
        let text = describe(format_args!("{long}"));
        assert_eq!(text.len(), 64);
    }

    #[test]
    fn test_from_unchecked_truncates() {
        let s: heapless::String<4> = FromUnchecked::from_unchecked("abcdef");
        assert_eq!(s.as_str(), "abcd");
        let s: heapless::String<4> = FromUnchecked::from_unchecked("ab");
        assert_eq!(s.as_str(), "ab");
    }
}
