//! # Guildbank Testing
//!
//! Testing utilities shared by the workspace: deterministic clocks and
//! common fixtures.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use guildbank_core::environment::Clock;
use guildbank_core::loan::LoanOption;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Manually advanced clock, for crossing due dates without sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap();
        *time += by;
    }

    /// Jump the clock to an absolute time.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    #[allow(clippy::unwrap_used)]
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// A stable timestamp for fixtures.
///
/// # Panics
///
/// Never; the date is valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// The loan product used throughout the test suites: principal 500, one
/// day, 10% interest, 10% overdue penalty.
#[must_use]
pub fn starter_loan_option() -> LoanOption {
    LoanOption::new("starter", 500, 1, 1_000, 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(fixture_time());
        assert_eq!(clock.now(), fixture_time());
        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), fixture_time() + Duration::days(2));
    }
}
