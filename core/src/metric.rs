//! Per-message processing metric types.
//!
//! These are the durable dashboard rows, not the in-process `metrics`
//! facade counters. They are best-effort: under load the aggregator may
//! drop samples, and that must never block ingestion.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How a message's trip through the pipeline ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Persisted (includes deduplicated re-deliveries).
    Success,
    /// Refused by the router, deserializer or validator.
    ValidationFailed,
    /// The store refused or kept failing.
    PersistFailed,
    /// Anything that fits no other bucket.
    Unknown,
}

impl ProcessingOutcome {
    /// Stable database string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationFailed => "validation_failed",
            Self::PersistFailed => "persist_failed",
            Self::Unknown => "unknown",
        }
    }
}

/// One message's processing measurement.
#[derive(Clone, Debug)]
pub struct MetricSample {
    /// Event type, or the topic's best guess when decoding failed.
    pub event_type: String,
    /// Topic the message arrived on.
    pub topic: String,
    /// Outcome bucket.
    pub outcome: ProcessingOutcome,
    /// Wall time from dispatch to disposition, backoff included.
    pub duration: Duration,
    /// When the sample was taken.
    pub recorded_at: DateTime<Utc>,
}
