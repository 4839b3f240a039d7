//! Overcurrent protection latch

use crate::metering::PowerReading;

/// Number of consecutive over-limit samples before the relay is tripped.
/// A single sample can catch the inrush of a motor or a cold lamp filament.
pub const TRIP_CONSECUTIVE_SAMPLES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionState {
    Armed,
    /// Latched after sustained overcurrent; holds the current that tripped it
    Tripped { current_ma: u32 },
}

/// Outcome of feeding one sample to the protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionEvent {
    None,
    Tripped { current_ma: u32 },
}

pub struct Protection {
    max_current_ma: u32,
    over_count: u8,
    state: ProtectionState,
}

impl Protection {
    pub const fn new(max_current_ma: u32) -> Self {
        Self {
            max_current_ma,
            over_count: 0,
            state: ProtectionState::Armed,
        }
    }

    pub fn state(&self) -> ProtectionState {
        self.state
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self.state, ProtectionState::Tripped { .. })
    }

    pub fn limit(&self) -> u32 {
        self.max_current_ma
    }

    /// Feed a reading taken while the relay is in `relay_on` state
    pub fn check(&mut self, reading: &PowerReading, relay_on: bool) -> ProtectionEvent {
        if self.is_tripped() || !relay_on {
            self.over_count = 0;
            return ProtectionEvent::None;
        }

        if reading.current_ma <= self.max_current_ma {
            self.over_count = 0;
            return ProtectionEvent::None;
        }

        self.over_count = self.over_count.saturating_add(1);
        if self.over_count >= TRIP_CONSECUTIVE_SAMPLES {
            self.over_count = 0;
            self.state = ProtectionState::Tripped {
                current_ma: reading.current_ma,
            };
            return ProtectionEvent::Tripped {
                current_ma: reading.current_ma,
            };
        }

        ProtectionEvent::None
    }

    /// Release the latch. Returns whether it was tripped.
    pub fn clear(&mut self) -> bool {
        let was_tripped = self.is_tripped();
        self.state = ProtectionState::Armed;
        self.over_count = 0;
        was_tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(current_ma: u32) -> PowerReading {
        PowerReading {
            voltage_mv: 230_000,
            current_ma,
            power_mw: current_ma * 230,
        }
    }

    #[test]
    fn test_trips_after_consecutive_samples() {
        let mut protection = Protection::new(10_000);
        assert_eq!(protection.check(&reading(12_000), true), ProtectionEvent::None);
        assert_eq!(protection.check(&reading(12_500), true), ProtectionEvent::None);
        assert_eq!(
            protection.check(&reading(13_000), true),
            ProtectionEvent::Tripped { current_ma: 13_000 }
        );
        assert!(protection.is_tripped());
    }

    #[test]
    fn test_normal_sample_resets_counter() {
        let mut protection = Protection::new(10_000);
        protection.check(&reading(12_000), true);
        protection.check(&reading(12_000), true);
        protection.check(&reading(9_000), true);
        assert_eq!(protection.check(&reading(12_000), true), ProtectionEvent::None);
        assert!(!protection.is_tripped());
    }

    #[test]
    fn test_ignores_samples_with_relay_off() {
        let mut protection = Protection::new(1_000);
        for _ in 0..5 {
            assert_eq!(protection.check(&reading(5_000), false), ProtectionEvent::None);
        }
        assert!(!protection.is_tripped());
    }

    #[test]
    fn test_clear_releases_latch() {
        let mut protection = Protection::new(1_000);
        for _ in 0..TRIP_CONSECUTIVE_SAMPLES {
            protection.check(&reading(2_000), true);
        }
        assert!(protection.clear());
        assert_eq!(protection.state(), ProtectionState::Armed);
        assert!(!protection.clear());
    }
}
