//! Mock implementations of core environment traits.

use audit_trail_core::clock::Clock;
use chrono::{DateTime, Utc};

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making skew-window tests reproducible.
///
/// # Example
///
/// ```
/// use audit_trail_testing::mocks::FixedClock;
/// use audit_trail_core::clock::Clock;
///
/// let clock = FixedClock::at("2024-01-01T12:00:00Z");
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// Create a fixed clock from an RFC 3339 string.
    ///
    /// # Panics
    ///
    /// Panics if the string is not valid RFC 3339 (test fixture misuse).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn at(rfc3339: &str) -> Self {
        Self::new(
            rfc3339
                .parse()
                .expect("FixedClock::at requires a valid RFC 3339 timestamp"),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}
