use super::PowerReading;

/// Aggregated readings over one report interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReport {
    /// Uptime in ms of the first reading in the window
    pub start_ms: u64,
    /// Number of readings aggregated
    pub samples: u32,
    pub avg_power_mw: u32,
    pub min_power_mw: u32,
    pub max_power_mw: u32,
    /// Most recent line voltage
    pub voltage_mv: u32,
    /// Most recent load current
    pub current_ma: u32,
    /// Cumulative energy at the end of the window
    pub energy_mwh: u64,
}

/// In-memory accumulator that turns a stream of readings into periodic
/// reports.
///
/// ## Usage
///
/// ```rust,ignore
/// let mut accumulator = MeterAccumulator::new(30_000);
///
/// // Add readings every second
/// if let Some(report) = accumulator.add_reading(now_ms, reading, energy_mwh) {
///     publish(report);
/// }
/// ```
pub struct MeterAccumulator {
    /// Aggregates of the readings since the current window started
    window: Option<Window>,
    interval_ms: u64,
}

/// Running totals for one report window
#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: u64,
    samples: u32,
    sum_mw: u64,
    min_mw: u32,
    max_mw: u32,
    last: PowerReading,
}

impl Window {
    fn open(start_ms: u64, reading: PowerReading) -> Self {
        Self {
            start_ms,
            samples: 1,
            sum_mw: reading.power_mw as u64,
            min_mw: reading.power_mw,
            max_mw: reading.power_mw,
            last: reading,
        }
    }

    fn add(&mut self, reading: PowerReading) {
        self.samples = self.samples.saturating_add(1);
        self.sum_mw = self.sum_mw.saturating_add(reading.power_mw as u64);
        self.min_mw = self.min_mw.min(reading.power_mw);
        self.max_mw = self.max_mw.max(reading.power_mw);
        self.last = reading;
    }

    fn report(&self, energy_mwh: u64) -> MeterReport {
        MeterReport {
            start_ms: self.start_ms,
            samples: self.samples,
            avg_power_mw: (self.sum_mw / self.samples as u64) as u32,
            min_power_mw: self.min_mw,
            max_power_mw: self.max_mw,
            voltage_mv: self.last.voltage_mv,
            current_ma: self.last.current_ma,
            energy_mwh,
        }
    }
}

impl MeterAccumulator {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            window: None,
            interval_ms,
        }
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Add a reading taken at uptime `now_ms`.
    ///
    /// Returns a report once the interval since the window start has elapsed;
    /// the reading that closes a window is included in that report.
    pub fn add_reading(
        &mut self,
        now_ms: u64,
        reading: PowerReading,
        energy_mwh: u64,
    ) -> Option<MeterReport> {
        let start_ms = match &mut self.window {
            Some(window) => {
                window.add(reading);
                window.start_ms
            }
            None => {
                self.window = Some(Window::open(now_ms, reading));
                now_ms
            }
        };

        if now_ms.saturating_sub(start_ms) < self.interval_ms {
            return None;
        }
        self.flush(energy_mwh)
    }

    /// Emit a report for whatever has accumulated so far
    pub fn flush(&mut self, energy_mwh: u64) -> Option<MeterReport> {
        self.window.take().map(|window| window.report(energy_mwh))
    }
}
