//! Wall-clock abstraction.
//!
//! - [`SystemClock`]: delegates to [`Utc::now`]
//! - [`ManualClock`]: returns a controllable time that moves only when told to

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
///
/// Ticket validity is expressed in wall-clock timestamps issued by the
/// authority, so the manager compares against [`DateTime<Utc>`] rather than a
/// monotonic instant.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Live implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock for tests. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock fixed at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: ChronoDuration) {
        *self.current.lock() += duration;
    }

    /// Sets the clock to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock() = time;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_manual_clock_advances_all_clones() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        clock.advance(ChronoDuration::seconds(700));

        assert_eq!(shared.now(), start + ChronoDuration::seconds(700));
    }

    #[test]
    fn test_system_clock_is_close_to_now() {
        let delta = SystemClock.now() - Utc::now();
        assert!(delta.num_seconds().abs() < 5);
    }
}
