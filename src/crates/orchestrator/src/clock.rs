//! Time source shared by every stateful component.
//!
//! Cooldowns, midnight rolls and TTLs all read "now" from a [`Clock`] so they
//! can be driven deterministically in tests.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Source of local wall-clock time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Local>;

    /// Current local calendar date
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// The real clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + to_chrono(by);
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Local>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Convert a std duration for chrono arithmetic
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// The next local midnight strictly after `now`
///
/// Falls back to 24 hours later when the local date has no midnight (DST gaps).
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| now + chrono::Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_manual_clock_crosses_midnight() {
        let clock = ManualClock::new(start());
        let before = clock.today();
        clock.advance(Duration::from_secs(2 * 3600));
        assert_eq!(clock.today(), before.succ_opt().unwrap());
    }

    #[test]
    fn test_next_local_midnight() {
        let midnight = next_local_midnight(start());
        assert_eq!(midnight, Local.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        assert!(midnight > start());
    }
}
