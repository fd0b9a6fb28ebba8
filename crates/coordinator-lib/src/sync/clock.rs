//! Reference clocks

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic timebase frames are compared against
pub trait ReferenceClock: Send + Sync {
    /// Time elapsed since the last anchor
    fn now(&self) -> Duration;

    /// Re-anchor so that `now()` reads zero
    fn reset(&self);
}

/// Wall-time monotonic clock
#[derive(Debug)]
pub struct MonotonicClock {
    anchor: Mutex<Instant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Mutex::new(Instant::now()),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.anchor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn reset(&self) {
        *self.anchor.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

/// Clock advanced by hand, for deterministic tests and replay
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }
}

impl ReferenceClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset(&self) {
        self.set(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(40));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(45));

        clock.reset();
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_monotonic_clock_is_anchored() {
        let clock = MonotonicClock::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() >= Duration::from_millis(5));

        clock.reset();
        assert!(clock.now() < Duration::from_millis(5));
    }
}
