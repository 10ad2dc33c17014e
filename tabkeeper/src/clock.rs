//! Time source abstraction so debounce/backoff/inactivity logic is testable.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock trait for testable time
pub trait Clock: Send + Sync {
    /// Monotonic time, used for debounce windows
    fn now(&self) -> Instant;
    /// Wall-clock time, used for everything that is persisted
    fn now_utc(&self) -> SystemTime;

    /// Wall-clock time as epoch milliseconds
    fn now_millis(&self) -> i64 {
        system_time_to_millis(self.now_utc())
    }
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Format epoch milliseconds as an RFC 3339 UTC timestamp
pub fn format_millis(millis: i64) -> String {
    use chrono::{DateTime, SecondsFormat, Utc};
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}
