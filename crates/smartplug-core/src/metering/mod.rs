//! Power measurement: meter trait, HLW8012 conversion, energy, and reporting

pub mod accumulator;
pub mod energy;
pub mod hlw8012;

pub use accumulator::{MeterAccumulator, MeterReport};
pub use energy::EnergyCounter;
pub use hlw8012::{Cf1Mode, Hlw8012Calibration, Hlw8012Converter, PulseWindow};

use thiserror_no_std::Error;

/// One instantaneous measurement of the load.
///
/// All values are fixed point in milli-units so no floats reach the wire
/// format or the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerReading {
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub power_mw: u32,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterError {
    #[error("{meter} read failed: {details}")]
    ReadFailed {
        meter: &'static str,
        details: &'static str,
    },
    #[error("{meter} timed out")]
    Timeout { meter: &'static str },
    #[error("measurement window is empty")]
    EmptyWindow,
    #[error("calibration needs a non-zero reference")]
    InvalidCalibration,
}

/// Trait for power metering front ends.
pub trait PowerMeter {
    /// Take one measurement of the load.
    fn read(&mut self) -> impl Future<Output = Result<PowerReading, MeterError>>;
}
