//! The transactional persister.

use crate::error::classify_sqlx_error;
use audit_trail_core::error::{PersistOutcome, StoreError};
use audit_trail_core::record::EventRecord;
use audit_trail_core::store::{BoxFuture, EventStore};
use sqlx::PgPool;
use std::time::Instant;

const INSERT_EVENT: &str = r#"
    INSERT INTO events (
        event_id, event_type, aggregate_id, aggregate_type, version,
        timestamp, source, topic, partition, "offset", event_data,
        correlation_id, causation_id, user_id
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

const UPSERT_CURSOR: &str = r"
    INSERT INTO partition_cursors (topic, partition, next_offset, updated_at)
    VALUES ($1, $2, $3, now())
    ON CONFLICT (topic, partition) DO UPDATE
    SET next_offset = GREATEST(partition_cursors.next_offset, EXCLUDED.next_offset),
        updated_at = now()
";

/// `PostgreSQL` audit event store.
///
/// One transaction per persist: insert the event row under its natural
/// key, advance the partition cursor when cursor storage is co-located,
/// commit. Unique-key collisions are classified, not raised:
///
/// - collision on `event_id` → [`PersistOutcome::Duplicate`] (the
///   idempotency anchor absorbing at-least-once re-delivery)
/// - collision on `(aggregate_type, aggregate_id, version)` →
///   [`PersistOutcome::VersionConflict`] (a producer bug, dead-lettered
///   by the dispatcher)
///
/// Rows are never updated or deleted here; the audit log is append-only.
pub struct PostgresAuditStore {
    pool: PgPool,
    cursor_co_located: bool,
}

impl PostgresAuditStore {
    /// Create a store over the shared pool. With `cursor_co_located` set,
    /// every successful persist advances the partition cursor row inside
    /// the same transaction.
    #[must_use]
    pub const fn new(pool: PgPool, cursor_co_located: bool) -> Self {
        Self {
            pool,
            cursor_co_located,
        }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn persist_inner(&self, record: &EventRecord) -> Result<PersistOutcome, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        let inserted = sqlx::query(INSERT_EVENT)
            .bind(record.event_id.as_uuid())
            .bind(&record.event_type)
            .bind(&record.aggregate_id)
            .bind(&record.aggregate_type)
            .bind(record.version)
            .bind(record.timestamp)
            .bind(&record.source)
            .bind(&record.coords.topic)
            .bind(record.coords.partition)
            .bind(record.coords.offset)
            .bind(&record.event_data)
            .bind(record.correlation_id.as_deref())
            .bind(record.causation_id.as_deref())
            .bind(record.user_id.as_deref())
            .execute(&mut *tx)
            .await;

        if let Err(error) = inserted {
            let constraint = match &error {
                sqlx::Error::Database(db) => db.constraint().map(str::to_owned),
                _ => None,
            };
            let _ = tx.rollback().await;

            return match constraint.as_deref() {
                Some("events_event_id_key") => {
                    // A re-delivery can arrive at a later offset than the
                    // insert that won; the cursor must still account for it.
                    if self.cursor_co_located {
                        sqlx::query(UPSERT_CURSOR)
                            .bind(&record.coords.topic)
                            .bind(record.coords.partition)
                            .bind(record.coords.next_offset())
                            .execute(&self.pool)
                            .await
                            .map_err(classify_sqlx_error)?;
                    }
                    metrics::counter!("audit_store_duplicates_total").increment(1);
                    Ok(PersistOutcome::Duplicate)
                }
                Some("events_aggregate_version_key") => {
                    metrics::counter!("audit_store_version_conflicts_total").increment(1);
                    Ok(PersistOutcome::VersionConflict)
                }
                _ => Err(classify_sqlx_error(error)),
            };
        }

        if self.cursor_co_located {
            sqlx::query(UPSERT_CURSOR)
                .bind(&record.coords.topic)
                .bind(record.coords.partition)
                .bind(record.coords.next_offset())
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
        }

        tx.commit().await.map_err(classify_sqlx_error)?;

        tracing::trace!(
            event_id = %record.event_id,
            coords = %record.coords,
            "audit row committed"
        );
        metrics::counter!("audit_store_events_persisted_total").increment(1);
        metrics::histogram!("audit_store_persist_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(PersistOutcome::Committed)
    }
}

impl EventStore for PostgresAuditStore {
    fn persist<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<PersistOutcome, StoreError>> {
        Box::pin(self.persist_inner(record))
    }
}
