//! Storage seam traits.
//!
//! The pipeline owns no durable state; everything below these traits
//! does. Production implementations live in `audit-trail-postgres`,
//! deterministic in-memory ones in `audit-trail-testing`.
//!
//! # Dyn compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn`
//! so the dispatcher can hold `Arc<dyn EventStore>` and friends as trait
//! objects.

use crate::error::{PersistOutcome, StoreError};
use crate::metric::MetricSample;
use crate::record::{DeadLetterRecord, EventRecord, RejectedMessage};
use std::future::Future;
use std::pin::Pin;

/// Boxed future alias used by all store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The append-only audit event store.
pub trait EventStore: Send + Sync {
    /// Persist one record transactionally.
    ///
    /// Must classify unique-key collisions rather than failing:
    /// an `event_id` collision is [`PersistOutcome::Duplicate`], an
    /// aggregate-version collision under a different `event_id` is
    /// [`PersistOutcome::VersionConflict`]. Implementations that co-locate
    /// the partition cursor advance it to `coords.offset + 1` inside the
    /// same transaction.
    ///
    /// Errors are reserved for failures where nothing was decided;
    /// [`StoreError::Transient`] ones are retried by the dispatcher.
    fn persist<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<PersistOutcome, StoreError>>;
}

/// Durable record of refused messages.
///
/// Entries are never deleted; operator-driven replay is the only way a
/// dead letter re-enters the pipeline.
pub trait DeadLetterStore: Send + Sync {
    /// Capture a refused message. Returns the store-assigned id.
    fn record_failure<'a>(
        &'a self,
        rejected: &'a RejectedMessage,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Fetch one dead letter by id.
    fn fetch(&self, id: i64) -> BoxFuture<'_, Result<Option<DeadLetterRecord>, StoreError>>;

    /// List dead letters that have never been successfully replayed,
    /// oldest first.
    fn list_unreplayed(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<DeadLetterRecord>, StoreError>>;

    /// Record a replay attempt: bumps the retry counter and stores the
    /// outcome string. The outcome `"persisted"` retires the entry from
    /// [`Self::list_unreplayed`]; any other string keeps it pending.
    fn record_replay_attempt<'a>(
        &'a self,
        id: i64,
        outcome: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Durable partition cursors, used when cursor storage is co-located
/// with the audit store.
pub trait CursorStore: Send + Sync {
    /// The next offset to consume for a partition, if one was ever
    /// persisted.
    fn load<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>>;

    /// Advance the cursor monotonically: a smaller `next_offset` than the
    /// stored one must be a no-op (cursors never rewind except by
    /// operator action).
    fn advance<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        next_offset: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Durable per-message processing metrics.
pub trait MetricsStore: Send + Sync {
    /// Append a drained batch of samples.
    fn append_batch<'a>(
        &'a self,
        samples: &'a [MetricSample],
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Operator-observable audit log.
///
/// The read surface writes most of these; the ingester writes exactly one
/// system-actor entry per successful batch commit.
pub trait AuditLogStore: Send + Sync {
    /// Record that the pipeline committed a partition through an offset.
    fn record_batch_commit<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        through_offset: i64,
        message_count: u64,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}
