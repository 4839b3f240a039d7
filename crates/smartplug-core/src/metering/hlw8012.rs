//! HLW8012 / BL0937 pulse-frequency conversion.
//!
//! The metering chip outputs two pulse trains:
//! - CF: frequency proportional to active power
//! - CF1: frequency proportional to RMS current or RMS voltage, selected by
//!   the SEL pin
//!
//! The firmware counts pulses over a window and hands a [`PulseWindow`] to
//! [`Hlw8012Converter`], which turns it into a [`PowerReading`]. Every
//! conversion is `value = pulses * factor / window_ms`, where the factor is
//! the value per Hz scaled by 1000.

use serde::{Deserialize, Serialize};

use super::{MeterError, PowerReading};

// Reference hardware: V_REF 2.43 V, 1 mOhm shunt, 2351:1 voltage divider,
// 3.579 MHz internal oscillator.
const DEFAULT_POWER_MW_PER_HZ_MILLI: u32 = 10_344_000;
const DEFAULT_VOLTAGE_MV_PER_HZ_MILLI: u32 = 408_640;
const DEFAULT_CURRENT_MA_PER_HZ_MILLI: u32 = 14_484;

/// Which quantity the CF1 output reports during a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cf1Mode {
    Voltage,
    Current,
}

impl Cf1Mode {
    /// The mode to measure in the next window
    pub const fn next(self) -> Self {
        match self {
            Self::Voltage => Self::Current,
            Self::Current => Self::Voltage,
        }
    }
}

/// Pulses counted on both outputs during one measurement window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseWindow {
    pub cf_pulses: u32,
    pub cf1_pulses: u32,
    pub window_ms: u32,
    pub cf1_mode: Cf1Mode,
}

impl PulseWindow {
    /// Pulse frequency in milli-Hz
    fn millihertz(pulses: u32, window_ms: u32) -> u64 {
        pulses as u64 * 1_000_000 / window_ms as u64
    }
}

/// Per-board conversion factors, in thousandths of a unit per Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hlw8012Calibration {
    pub power_mw_per_hz_milli: u32,
    pub voltage_mv_per_hz_milli: u32,
    pub current_ma_per_hz_milli: u32,
}

impl Default for Hlw8012Calibration {
    fn default() -> Self {
        Self {
            power_mw_per_hz_milli: DEFAULT_POWER_MW_PER_HZ_MILLI,
            voltage_mv_per_hz_milli: DEFAULT_VOLTAGE_MV_PER_HZ_MILLI,
            current_ma_per_hz_milli: DEFAULT_CURRENT_MA_PER_HZ_MILLI,
        }
    }
}

fn scale(pulses: u32, factor: u32, window_ms: u32) -> u32 {
    let value = pulses as u64 * factor as u64 / window_ms as u64;
    value.min(u32::MAX as u64) as u32
}

fn factor_for(expected: u32, millihertz: u64) -> Result<u32, MeterError> {
    if millihertz == 0 || expected == 0 {
        return Err(MeterError::InvalidCalibration);
    }
    let factor = expected as u64 * 1_000_000 / millihertz;
    u32::try_from(factor).map_err(|_| MeterError::InvalidCalibration)
}

/// Stateful converter.
///
/// CF1 only carries one of voltage or current per window, so the last value
/// of the other quantity is kept and reused.
pub struct Hlw8012Converter {
    calibration: Hlw8012Calibration,
    voltage_mv: u32,
    current_ma: u32,
    last_power_mhz: u64,
    last_current_mhz: u64,
}

impl Hlw8012Converter {
    pub const fn new(calibration: Hlw8012Calibration) -> Self {
        Self {
            calibration,
            voltage_mv: 0,
            current_ma: 0,
            last_power_mhz: 0,
            last_current_mhz: 0,
        }
    }

    pub fn calibration(&self) -> Hlw8012Calibration {
        self.calibration
    }

    /// Convert a window of pulses into a reading.
    ///
    /// With the relay open the chip still sees line voltage but any current
    /// it reports is noise, so power and current are forced to zero.
    pub fn convert(
        &mut self,
        window: &PulseWindow,
        relay_on: bool,
    ) -> Result<PowerReading, MeterError> {
        if window.window_ms == 0 {
            return Err(MeterError::EmptyWindow);
        }

        let cal = &self.calibration;
        match window.cf1_mode {
            Cf1Mode::Voltage => {
                self.voltage_mv =
                    scale(window.cf1_pulses, cal.voltage_mv_per_hz_milli, window.window_ms);
            }
            Cf1Mode::Current => {
                self.current_ma =
                    scale(window.cf1_pulses, cal.current_ma_per_hz_milli, window.window_ms);
                self.last_current_mhz =
                    PulseWindow::millihertz(window.cf1_pulses, window.window_ms);
            }
        }

        let mut power_mw = scale(window.cf_pulses, cal.power_mw_per_hz_milli, window.window_ms);
        self.last_power_mhz = PulseWindow::millihertz(window.cf_pulses, window.window_ms);

        if !relay_on || power_mw == 0 {
            power_mw = 0;
            self.current_ma = 0;
        }

        Ok(PowerReading {
            voltage_mv: self.voltage_mv,
            current_ma: self.current_ma,
            power_mw,
        })
    }

    /// Rescale the power and current factors against a known resistive load.
    ///
    /// Needs at least one power window and one current window converted with
    /// the reference load attached, plus a measured line voltage.
    pub fn calibrate(&mut self, expected_power_mw: u32) -> Result<Hlw8012Calibration, MeterError> {
        if self.voltage_mv == 0 {
            return Err(MeterError::InvalidCalibration);
        }
        let power_factor = factor_for(expected_power_mw, self.last_power_mhz)?;

        // Resistive load: I = P / V
        let expected_current_ma =
            (expected_power_mw as u64 * 1000 / self.voltage_mv as u64) as u32;
        let current_factor = factor_for(expected_current_ma, self.last_current_mhz)?;

        self.calibration.power_mw_per_hz_milli = power_factor;
        self.calibration.current_ma_per_hz_milli = current_factor;
        log::info!(
            "HLW8012 recalibrated: power {} current {}",
            power_factor,
            current_factor
        );
        Ok(self.calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(cf: u32, cf1: u32, mode: Cf1Mode) -> PulseWindow {
        PulseWindow {
            cf_pulses: cf,
            cf1_pulses: cf1,
            window_ms: 1000,
            cf1_mode: mode,
        }
    }

    #[test]
    fn test_default_factors_give_mains_voltage() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        let reading = conv.convert(&window(0, 563, Cf1Mode::Voltage), true).unwrap();
        // 563 Hz * 408.64 mV/Hz
        assert_eq!(reading.voltage_mv, 230_064);
        assert_eq!(reading.power_mw, 0);
    }

    #[test]
    fn test_voltage_is_kept_across_current_windows() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        conv.convert(&window(10, 563, Cf1Mode::Voltage), true).unwrap();
        let reading = conv.convert(&window(10, 100, Cf1Mode::Current), true).unwrap();
        assert_eq!(reading.voltage_mv, 230_064);
        assert_eq!(reading.current_ma, 1_448);
        assert_eq!(reading.power_mw, 103_440);
    }

    #[test]
    fn test_relay_off_zeroes_power_and_current() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        let reading = conv.convert(&window(10, 100, Cf1Mode::Current), false).unwrap();
        assert_eq!(reading.power_mw, 0);
        assert_eq!(reading.current_ma, 0);
    }

    #[test]
    fn test_empty_window_is_an_error() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        let mut w = window(1, 1, Cf1Mode::Voltage);
        w.window_ms = 0;
        assert_eq!(conv.convert(&w, true), Err(MeterError::EmptyWindow));
    }

    #[test]
    fn test_calibrate_against_reference_load() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        conv.convert(&window(5, 500, Cf1Mode::Voltage), true).unwrap();
        conv.convert(&window(5, 20, Cf1Mode::Current), true).unwrap();

        // 5 Hz should read as 60 W from now on
        let cal = conv.calibrate(60_000).unwrap();
        assert_eq!(cal.power_mw_per_hz_milli, 12_000_000);

        let reading = conv.convert(&window(5, 20, Cf1Mode::Current), true).unwrap();
        assert_eq!(reading.power_mw, 60_000);
        // 60 W / 204.32 V
        assert_eq!(reading.current_ma, 293);
    }

    #[test]
    fn test_calibrate_without_measurements_fails() {
        let mut conv = Hlw8012Converter::new(Hlw8012Calibration::default());
        assert_eq!(conv.calibrate(60_000), Err(MeterError::InvalidCalibration));
    }
}
