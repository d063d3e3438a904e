//! In-memory implementations of the storage seams.
//!
//! Each store is a guarded map/vec with the same classification rules as
//! the Postgres implementations, plus inspection helpers for assertions
//! and transient-failure injection for retry tests.

use audit_trail_core::error::{PersistOutcome, StoreError};
use audit_trail_core::metric::MetricSample;
use audit_trail_core::record::{DeadLetterRecord, EventRecord, RejectedMessage, StoredEvent};
use audit_trail_core::store::{
    AuditLogStore, BoxFuture, CursorStore, DeadLetterStore, EventStore, MetricsStore,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Outcome string a replay attempt records when the event was persisted.
pub const REPLAY_PERSISTED: &str = "persisted";

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct AuditState {
    events: Vec<StoredEvent>,
    by_event_id: HashSet<Uuid>,
    by_aggregate_version: HashSet<(String, String, i64)>,
    next_id: i64,
}

/// In-memory audit event store with the production classification rules.
///
/// Optionally shares an [`InMemoryCursorStore`] to model co-located
/// cursor commits: when attached, a successful persist advances the
/// cursor in the same logical step.
#[derive(Default)]
pub struct InMemoryAuditStore {
    state: Mutex<AuditState>,
    cursors: Option<std::sync::Arc<InMemoryCursorStore>>,
    fail_remaining: AtomicUsize,
    duplicates: AtomicU64,
}

impl InMemoryAuditStore {
    /// Create an empty store with bus-held cursor semantics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that advances the given cursor store inside each
    /// successful persist (co-located mode).
    #[must_use]
    pub fn with_co_located_cursors(cursors: std::sync::Arc<InMemoryCursorStore>) -> Self {
        Self {
            cursors: Some(cursors),
            ..Self::default()
        }
    }

    /// Make the next `n` persist calls fail transiently.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all stored events, insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<StoredEvent> {
        guard(&self.state).events.clone()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.state).events.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many duplicate deliveries were absorbed.
    #[must_use]
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// The versions stored for one aggregate, ascending.
    #[must_use]
    pub fn versions_of(&self, aggregate_type: &str, aggregate_id: &str) -> Vec<i64> {
        let state = guard(&self.state);
        let mut versions: Vec<i64> = state
            .events
            .iter()
            .filter(|e| {
                e.record.aggregate_type == aggregate_type && e.record.aggregate_id == aggregate_id
            })
            .map(|e| e.record.version)
            .collect();
        versions.sort_unstable();
        versions
    }
}

impl EventStore for InMemoryAuditStore {
    fn persist<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<PersistOutcome, StoreError>> {
        Box::pin(async move {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Transient("injected store outage".to_string()));
            }

            let outcome = {
                let mut state = guard(&self.state);
                if state.by_event_id.contains(&record.event_id.as_uuid()) {
                    self.duplicates.fetch_add(1, Ordering::SeqCst);
                    PersistOutcome::Duplicate
                } else {
                    let aggregate_key = (
                        record.aggregate_type.clone(),
                        record.aggregate_id.clone(),
                        record.version,
                    );
                    if state.by_aggregate_version.contains(&aggregate_key) {
                        PersistOutcome::VersionConflict
                    } else {
                        state.by_event_id.insert(record.event_id.as_uuid());
                        state.by_aggregate_version.insert(aggregate_key);
                        state.next_id += 1;
                        let id = state.next_id;
                        state.events.push(StoredEvent {
                            id,
                            record: record.clone(),
                            created_at: Utc::now(),
                        });
                        PersistOutcome::Committed
                    }
                }
            };

            // Co-located mode: duplicates and fresh rows both advance the
            // cursor; a version conflict is dead-lettered by the caller.
            if matches!(
                outcome,
                PersistOutcome::Committed | PersistOutcome::Duplicate
            ) {
                if let Some(cursors) = &self.cursors {
                    cursors
                        .advance(
                            &record.coords.topic,
                            record.coords.partition,
                            record.coords.next_offset(),
                        )
                        .await?;
                }
            }

            Ok(outcome)
        })
    }
}

/// In-memory monotonic partition cursors.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<(String, i32), i64>>,
}

impl InMemoryCursorStore {
    /// Create an empty cursor store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor for a partition, if any.
    #[must_use]
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        guard(&self.cursors)
            .get(&(topic.to_string(), partition))
            .copied()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move { Ok(self.get(topic, partition)) })
    }

    fn advance<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        next_offset: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut cursors = guard(&self.cursors);
            let entry = cursors.entry((topic.to_string(), partition)).or_insert(0);
            *entry = (*entry).max(next_offset);
            Ok(())
        })
    }
}

/// In-memory dead-letter store.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
    fail_remaining: AtomicUsize,
}

impl InMemoryDeadLetterStore {
    /// Create an empty dead-letter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` inserts fail transiently.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all dead letters, insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        guard(&self.records).clone()
    }

    /// Number of dead letters.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.records).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn record_failure<'a>(
        &'a self,
        rejected: &'a RejectedMessage,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Transient("injected dlq outage".to_string()));
            }

            let mut records = guard(&self.records);
            let id = i64::try_from(records.len()).unwrap_or(i64::MAX) + 1;
            records.push(DeadLetterRecord {
                id,
                rejected: rejected.clone(),
                retry_count: 0,
                last_retry_outcome: None,
            });
            Ok(id)
        })
    }

    fn fetch(&self, id: i64) -> BoxFuture<'_, Result<Option<DeadLetterRecord>, StoreError>> {
        Box::pin(async move {
            Ok(guard(&self.records)
                .iter()
                .find(|r| r.id == id)
                .cloned())
        })
    }

    fn list_unreplayed(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<DeadLetterRecord>, StoreError>> {
        Box::pin(async move {
            Ok(guard(&self.records)
                .iter()
                .filter(|r| r.last_retry_outcome.as_deref() != Some(REPLAY_PERSISTED))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn record_replay_attempt<'a>(
        &'a self,
        id: i64,
        outcome: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut records = guard(&self.records);
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return Err(StoreError::Fatal(format!("no dead letter with id {id}")));
            };
            record.retry_count += 1;
            record.last_retry_outcome = Some(outcome.to_string());
            Ok(())
        })
    }
}

/// In-memory metrics store.
#[derive(Default)]
pub struct InMemoryMetricsStore {
    samples: Mutex<Vec<MetricSample>>,
    fail_remaining: AtomicUsize,
}

impl InMemoryMetricsStore {
    /// Create an empty metrics store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch appends fail transiently.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all flushed samples.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        guard(&self.samples).clone()
    }

    /// Number of flushed samples.
    #[must_use]
    pub fn len(&self) -> usize {
        guard(&self.samples).len()
    }

    /// Whether nothing has been flushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn append_batch<'a>(
        &'a self,
        samples: &'a [MetricSample],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Transient("injected metrics outage".to_string()));
            }
            guard(&self.samples).extend_from_slice(samples);
            Ok(())
        })
    }
}

/// One system-actor batch-commit audit entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchCommitEntry {
    /// Committed topic.
    pub topic: String,
    /// Committed partition.
    pub partition: i32,
    /// Offset the cursor advanced through.
    pub through_offset: i64,
    /// Messages accounted for by this commit.
    pub message_count: u64,
}

/// In-memory audit log of pipeline batch commits.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<BatchCommitEntry>>,
}

impl InMemoryAuditLog {
    /// Create an empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries.
    #[must_use]
    pub fn entries(&self) -> Vec<BatchCommitEntry> {
        guard(&self.entries).clone()
    }
}

impl AuditLogStore for InMemoryAuditLog {
    fn record_batch_commit<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        through_offset: i64,
        message_count: u64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            guard(&self.entries).push(BatchCommitEntry {
                topic: topic.to_string(),
                partition,
                through_offset,
                message_count,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use audit_trail_core::bus::BusCoordinates;
    use audit_trail_core::envelope::decode;
    use audit_trail_core::schema::SchemaDescriptor;
    use audit_trail_core::validate::Validator;
    use std::sync::Arc;

    fn record(event_id: &str, aggregate_id: &str, version: i64, offset: i64) -> EventRecord {
        let bytes = crate::fixtures::EnvelopeBuilder::order_created()
            .event_id(event_id)
            .aggregate(aggregate_id, "Order")
            .version(version)
            .build_json();
        let wire = decode(&bytes).unwrap();
        let envelope = Validator::new(Arc::new(crate::mocks::FixedClock::at(
            "2024-01-01T12:00:00Z",
        )))
        .validate(wire, &SchemaDescriptor::new("OrderCreated"))
        .unwrap();
        EventRecord::from_envelope(
            envelope,
            BusCoordinates::new("orders.order.created", 0, offset),
        )
    }

    #[tokio::test]
    async fn persist_then_duplicate() {
        let store = InMemoryAuditStore::new();
        let r = record("11111111-1111-1111-1111-111111111111", "ORD-1", 1, 42);

        assert_eq!(store.persist(&r).await.unwrap(), PersistOutcome::Committed);
        assert_eq!(store.persist(&r).await.unwrap(), PersistOutcome::Duplicate);
        assert_eq!(store.len(), 1);
        assert_eq!(store.duplicate_count(), 1);
    }

    #[tokio::test]
    async fn version_conflict_on_different_event_id() {
        let store = InMemoryAuditStore::new();
        let first = record("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa", "ORD-1", 1, 1);
        let second = record("bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb", "ORD-1", 1, 2);

        assert_eq!(
            store.persist(&first).await.unwrap(),
            PersistOutcome::Committed
        );
        assert_eq!(
            store.persist(&second).await.unwrap(),
            PersistOutcome::VersionConflict
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_then_recovery() {
        let store = InMemoryAuditStore::new();
        store.fail_times(2);
        let r = record("11111111-1111-1111-1111-111111111111", "ORD-1", 1, 1);

        assert!(store.persist(&r).await.unwrap_err().is_transient());
        assert!(store.persist(&r).await.unwrap_err().is_transient());
        assert_eq!(store.persist(&r).await.unwrap(), PersistOutcome::Committed);
    }

    #[tokio::test]
    async fn co_located_cursor_advances_with_persist() {
        let cursors = Arc::new(InMemoryCursorStore::new());
        let store = InMemoryAuditStore::with_co_located_cursors(Arc::clone(&cursors));
        let r = record("11111111-1111-1111-1111-111111111111", "ORD-1", 1, 42);

        store.persist(&r).await.unwrap();
        assert_eq!(cursors.get("orders.order.created", 0), Some(43));
    }

    #[tokio::test]
    async fn cursor_never_rewinds() {
        let cursors = InMemoryCursorStore::new();
        cursors.advance("t", 0, 10).await.unwrap();
        cursors.advance("t", 0, 7).await.unwrap();
        assert_eq!(cursors.get("t", 0), Some(10));
    }

    #[tokio::test]
    async fn audit_log_captures_batch_commits() {
        let log = InMemoryAuditLog::new();
        log.record_batch_commit("orders.order.created", 0, 43, 2)
            .await
            .unwrap();

        assert_eq!(
            log.entries(),
            vec![BatchCommitEntry {
                topic: "orders.order.created".to_string(),
                partition: 0,
                through_offset: 43,
                message_count: 2,
            }]
        );
    }
}
