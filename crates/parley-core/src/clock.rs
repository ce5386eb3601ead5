//! Clock abstraction so time can be simulated in tests.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" for message stamps and typing staleness.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never goes backwards.
///
/// If the system clock steps back, the last issued instant is repeated until
/// wall time catches up.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        let previous = self.last_millis.fetch_max(wall, Ordering::SeqCst);
        from_millis(wall.max(previous))
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at the given Unix time in milliseconds.
    #[must_use]
    pub fn at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        from_millis(self.millis.load(Ordering::SeqCst))
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

/// Wire format for timestamps: RFC 3339, UTC, millisecond precision.
#[must_use]
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whole milliseconds elapsed from `earlier` to `later` (negative if reversed).
#[must_use]
pub fn elapsed_millis(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    later.timestamp_millis() - earlier.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        // simulate a previously issued instant far in the future
        clock.last_millis.store(i64::MAX / 2, Ordering::SeqCst);

        let first = clock.now();
        let second = clock.now();

        assert_eq!(first.timestamp_millis(), i64::MAX / 2);
        assert!(second >= first);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_millis(1_000);
        clock.advance(Duration::from_secs(15));

        assert_eq!(clock.now().timestamp_millis(), 16_000);
        assert_eq!(elapsed_millis(from_millis(1_000), clock.now()), 15_000);
    }

    #[test]
    fn test_rfc3339_format() {
        let at = from_millis(1_672_531_200_123);
        assert_eq!(to_rfc3339(at), "2023-01-01T00:00:00.123Z");
    }
}
