//! Clock abstraction so time-dependent checks are testable.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// The validator's timestamp-skew window and the dead-letter `first_seen`
/// stamp both go through this trait, which lets tests pin time with a
/// fixed clock instead of racing `Utc::now()`.
pub trait Clock: Send + Sync {
    /// The current time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
