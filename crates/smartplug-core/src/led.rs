//! Status LED patterns

use crate::app_state::AppRunState;
use crate::relay::RelayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    Solid,
    /// WiFi association in progress
    SlowBlink,
    /// Network up, waiting for the broker
    FastBlink,
    /// Fault latched or unrecoverable error
    DoubleBlink,
}

impl LedPattern {
    /// Pick the pattern for the current device state.
    ///
    /// Once online the LED mirrors the relay.
    pub const fn for_state(run_state: AppRunState, relay: RelayState, tripped: bool) -> Self {
        if tripped {
            return Self::DoubleBlink;
        }
        match run_state {
            AppRunState::Booting | AppRunState::WifiConnecting => Self::SlowBlink,
            AppRunState::WifiConnected | AppRunState::MqttConnecting => Self::FastBlink,
            AppRunState::Error => Self::DoubleBlink,
            AppRunState::Online => match relay {
                RelayState::On => Self::Solid,
                RelayState::Off => Self::Off,
            },
        }
    }

    /// Length of one cycle, `None` for static patterns
    pub const fn period_ms(self) -> Option<u64> {
        match self {
            Self::Off | Self::Solid => None,
            Self::SlowBlink => Some(1_000),
            Self::FastBlink => Some(200),
            Self::DoubleBlink => Some(1_500),
        }
    }

    pub const fn is_lit(self, now_ms: u64) -> bool {
        let Some(period) = self.period_ms() else {
            return matches!(self, Self::Solid);
        };
        let phase = now_ms % period;
        match self {
            Self::DoubleBlink => phase < 150 || (phase >= 300 && phase < 450),
            _ => phase < period / 2,
        }
    }
}
