//! Time sources for query timing and the global dump window.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A source of time for the diagnostics.
///
/// Query durations are measured against `now`, while the global dump limiter
/// buckets emissions by `unix_second`.
pub trait Clock: Send + Sync {
    /// Monotonic instant used to time queries and requests.
    fn now(&self) -> Instant;

    /// Coarse wall-clock second used by the global dump limiter.
    fn unix_second(&self) -> i64;
}

/// Clock backed by the system's monotonic and wall clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_second(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
///
/// Lets tests simulate slow queries and second rollovers without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_second: i64,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock starting at the given wall-clock second.
    pub fn new(origin_second: i64) -> Self {
        Self {
            origin: Instant::now(),
            origin_second,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    /// Move the clock forward by a number of seconds.
    ///
    /// # Panics
    ///
    /// Panics if `secs` is negative, NaN or too large for a `Duration`.
    pub fn advance_secs_f64(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn unix_second(&self) -> i64 {
        self.origin_second + self.elapsed.lock().as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100);
        let start = clock.now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.now() - start, Duration::from_millis(1500));
        assert_eq!(clock.unix_second(), 101);
    }

    #[test]
    fn test_manual_clock_is_still_without_advance() {
        let clock = ManualClock::default();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.unix_second(), 0);
    }

    #[test]
    fn test_system_clock_second_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.unix_second() > 1_577_836_800);
    }
}
