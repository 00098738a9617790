//! Clock injection
//!
//! Components that make time-based decisions (circuit breakers, rate limits,
//! cache expiry, alert dedup) read time through [`SharedClock`] so tests can
//! drive them with [`ManualClock`].

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
pub use mockable::{Clock, DefaultClock};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock handle shared between components
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Wall clock used in production
pub fn system_clock() -> SharedClock {
    Arc::new(DefaultClock)
}

/// Milliseconds elapsed from `earlier` to `later`, saturating at zero
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::max_value())
}

/// `at + by`, clamped to the latest representable instant
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(chrono_duration(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, clamped to the earliest representable instant
pub fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(chrono_duration(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Arc<Self> {
        Arc::new(Self::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = saturating_add(*now, by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
