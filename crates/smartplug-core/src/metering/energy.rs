//! Cumulative energy counter

/// Milliwatt-milliseconds in one milliwatt-hour
const MW_MS_PER_MWH: u64 = 3_600_000;

/// Integrates power over time without losing the sub-mWh remainder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyCounter {
    total_mwh: u64,
    remainder_mw_ms: u64,
}

impl EnergyCounter {
    /// Resume counting from a persisted total
    pub const fn from_total(total_mwh: u64) -> Self {
        Self {
            total_mwh,
            remainder_mw_ms: 0,
        }
    }

    /// Add `power_mw` held for `elapsed_ms`
    pub fn add(&mut self, power_mw: u32, elapsed_ms: u32) {
        self.remainder_mw_ms += power_mw as u64 * elapsed_ms as u64;
        self.total_mwh += self.remainder_mw_ms / MW_MS_PER_MWH;
        self.remainder_mw_ms %= MW_MS_PER_MWH;
    }

    pub fn milliwatt_hours(&self) -> u64 {
        self.total_mwh
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hour_at_100w() {
        let mut counter = EnergyCounter::default();
        for _ in 0..3600 {
            counter.add(100_000, 1000);
        }
        assert_eq!(counter.milliwatt_hours(), 100_000);
    }

    #[test]
    fn test_remainder_is_carried() {
        let mut counter = EnergyCounter::default();
        // 1 W for 1 s is 0.277 mWh; 13 seconds crosses 3 mWh
        for _ in 0..13 {
            counter.add(1_000, 1_000);
        }
        assert_eq!(counter.milliwatt_hours(), 3);
    }

    #[test]
    fn test_resume_and_reset() {
        let mut counter = EnergyCounter::from_total(42);
        counter.add(3_600_000, 1);
        assert_eq!(counter.milliwatt_hours(), 43);
        counter.reset();
        assert_eq!(counter.milliwatt_hours(), 0);
    }
}
