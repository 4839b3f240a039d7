//! Exponential backoff for WiFi and broker reconnects

use embassy_time::Duration;

const INITIAL_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Backoff {
    next_secs: u64,
    max_secs: u64,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_DELAY_SECS, MAX_DELAY_SECS)
    }
}

impl Backoff {
    pub const fn new(initial_secs: u64, max_secs: u64) -> Self {
        Self {
            next_secs: initial_secs,
            max_secs,
            attempts: 0,
        }
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_secs.min(self.max_secs);
        self.next_secs = (delay * 2).min(self.max_secs);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_secs(delay)
    }

    /// Failed attempts since the last success
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        *self = Self::new(INITIAL_DELAY_SECS, self.max_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::default();
        let delays: [u64; 8] = core::array::from_fn(|_| backoff.next_delay().as_secs());
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempts(), 1);
    }
}
