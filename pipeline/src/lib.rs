//! # Audit Trail Pipeline
//!
//! The transactional path between the bus and the store: routing,
//! deserialization, validation, persistence with retry, dead-lettering,
//! metrics aggregation and operator-driven replay.
//!
//! The [`dispatcher::Dispatcher`] owns the per-message state machine;
//! the consumer loop (in `audit-trail-kafka`) owns partition lifecycle
//! and offset commits and calls into the dispatcher one message at a
//! time per partition.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod metrics;
pub mod replay;
pub mod retry;

pub use dispatcher::{Dispatcher, DispatcherBuilder, Disposition};
pub use metrics::{MetricsAggregator, MetricsFlusher};
pub use replay::{DlqReplayer, ReplayOutcome};
pub use retry::{RetryPolicy, retry_with_predicate};
