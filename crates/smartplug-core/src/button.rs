//! Push button gesture detection

/// Presses shorter than this are contact bounce
pub const DEBOUNCE_MS: u64 = 50;

/// Holding the button this long requests a factory reset
pub const LONG_PRESS_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGesture {
    /// Short press and release: toggle the relay
    Press,
    /// Held past [`LONG_PRESS_MS`]: factory reset
    LongPress,
}

/// Turns raw button edges into gestures.
///
/// Feed every level change to [`ButtonTracker::on_edge`] and call
/// [`ButtonTracker::poll`] periodically while the button is held so a long
/// press fires without waiting for the release.
#[derive(Debug, Default)]
pub struct ButtonTracker {
    pressed_at: Option<u64>,
    long_fired: bool,
}

impl ButtonTracker {
    pub const fn new() -> Self {
        Self {
            pressed_at: None,
            long_fired: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.pressed_at.is_some()
    }

    pub fn on_edge(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonGesture> {
        if pressed {
            if self.pressed_at.is_none() {
                self.pressed_at = Some(now_ms);
                self.long_fired = false;
            }
            return None;
        }

        let start = self.pressed_at.take()?;
        if self.long_fired {
            return None;
        }

        let held = now_ms.saturating_sub(start);
        if held >= LONG_PRESS_MS {
            Some(ButtonGesture::LongPress)
        } else if held >= DEBOUNCE_MS {
            Some(ButtonGesture::Press)
        } else {
            None
        }
    }

    pub fn poll(&mut self, now_ms: u64) -> Option<ButtonGesture> {
        let start = self.pressed_at?;
        if !self.long_fired && now_ms.saturating_sub(start) >= LONG_PRESS_MS {
            self.long_fired = true;
            return Some(ButtonGesture::LongPress);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_press() {
        let mut button = ButtonTracker::new();
        assert_eq!(button.on_edge(true, 1_000), None);
        assert_eq!(button.on_edge(false, 1_200), Some(ButtonGesture::Press));
        assert!(!button.is_held());
    }

    #[test]
    fn test_bounce_is_ignored() {
        let mut button = ButtonTracker::new();
        button.on_edge(true, 1_000);
        assert_eq!(button.on_edge(false, 1_010), None);
    }

    #[test]
    fn test_repeated_press_edge_keeps_first_timestamp() {
        let mut button = ButtonTracker::new();
        button.on_edge(true, 0);
        button.on_edge(true, 4_000);
        assert_eq!(button.on_edge(false, 5_100), Some(ButtonGesture::LongPress));
    }

    #[test]
    fn test_long_press_fires_once_while_held() {
        let mut button = ButtonTracker::new();
        button.on_edge(true, 0);
        assert_eq!(button.poll(4_999), None);
        assert_eq!(button.poll(5_000), Some(ButtonGesture::LongPress));
        assert_eq!(button.poll(6_000), None);
        assert_eq!(button.on_edge(false, 7_000), None);
    }
}
