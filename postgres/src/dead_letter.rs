//! Dead-letter sink and replay reads.

use crate::error::classify_sqlx_error;
use audit_trail_core::bus::BusCoordinates;
use audit_trail_core::error::{ErrorKind, StoreError};
use audit_trail_core::record::{DeadLetterRecord, RejectedMessage};
use audit_trail_core::store::{BoxFuture, DeadLetterStore};
use sqlx::{PgPool, Row};

/// `PostgreSQL` dead-letter store.
///
/// Captures every message the pipeline refuses, with enough context to
/// reconstruct the original delivery byte-for-byte. Entries are never
/// deleted; operator-driven replay updates only the retry bookkeeping.
pub struct PostgresDeadLetterStore {
    pool: PgPool,
}

impl PostgresDeadLetterStore {
    /// Create a dead-letter store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Count of entries never successfully replayed. Useful for health
    /// dashboards: DLQ growth is the operator's signal for producer and
    /// schema problems.
    ///
    /// # Errors
    ///
    /// Returns a classified [`StoreError`] if the query fails.
    pub async fn unreplayed_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM dlq
            WHERE last_retry_outcome IS DISTINCT FROM 'persisted'
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(count)
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<DeadLetterRecord, StoreError> {
        let kind_text: String = row.get("error_kind");
        let kind = ErrorKind::parse(&kind_text)
            .map_err(|k| StoreError::Fatal(format!("unrecognized error kind in dlq row: {k}")))?;

        let headers_json: serde_json::Value = row.get("headers");
        let headers: Vec<(String, Vec<u8>)> =
            serde_json::from_value(headers_json).unwrap_or_default();

        Ok(DeadLetterRecord {
            id: row.get("id"),
            rejected: RejectedMessage {
                coords: BusCoordinates {
                    topic: row.get("topic"),
                    partition: row.get("partition"),
                    offset: row.get("offset"),
                },
                key: row.get("key"),
                headers,
                payload: row.get("payload"),
                schema_attempted: row.get("schema_attempted"),
                kind,
                detail: row.get("error_detail"),
                first_seen: row.get("first_seen"),
            },
            retry_count: row.get("retry_count"),
            last_retry_outcome: row.get("last_retry_outcome"),
        })
    }
}

impl DeadLetterStore for PostgresDeadLetterStore {
    fn record_failure<'a>(
        &'a self,
        rejected: &'a RejectedMessage,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let headers = serde_json::to_value(&rejected.headers)
                .map_err(|e| StoreError::Fatal(format!("headers not serializable: {e}")))?;

            let (id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO dlq (
                    topic, partition, "offset", key, payload, headers,
                    schema_attempted, error_kind, error_detail, first_seen
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id
                "#,
            )
            .bind(&rejected.coords.topic)
            .bind(rejected.coords.partition)
            .bind(rejected.coords.offset)
            .bind(rejected.key.as_deref())
            .bind(&rejected.payload)
            .bind(headers)
            .bind(rejected.schema_attempted.as_deref())
            .bind(rejected.kind.as_str())
            .bind(&rejected.detail)
            .bind(rejected.first_seen)
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            tracing::warn!(
                dlq_id = id,
                coords = %rejected.coords,
                kind = %rejected.kind,
                "dead letter recorded"
            );
            metrics::counter!("audit_store_dead_letters_total", "kind" => rejected.kind.as_str())
                .increment(1);

            Ok(id)
        })
    }

    fn fetch(&self, id: i64) -> BoxFuture<'_, Result<Option<DeadLetterRecord>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r#"
                SELECT id, topic, partition, "offset", key, payload, headers,
                       schema_attempted, error_kind, error_detail, first_seen,
                       retry_count, last_retry_outcome
                FROM dlq
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            row.as_ref().map(Self::row_to_record).transpose()
        })
    }

    fn list_unreplayed(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<DeadLetterRecord>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT id, topic, partition, "offset", key, payload, headers,
                       schema_attempted, error_kind, error_detail, first_seen,
                       retry_count, last_retry_outcome
                FROM dlq
                WHERE last_retry_outcome IS DISTINCT FROM 'persisted'
                ORDER BY first_seen ASC
                LIMIT $1
                "#,
            )
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            rows.iter().map(Self::row_to_record).collect()
        })
    }

    fn record_replay_attempt<'a>(
        &'a self,
        id: i64,
        outcome: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE dlq
                SET retry_count = retry_count + 1,
                    last_retry_outcome = $1
                WHERE id = $2
                ",
            )
            .bind(outcome)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Fatal(format!("no dead letter with id {id}")));
            }

            tracing::info!(dlq_id = id, outcome, "replay attempt recorded");
            Ok(())
        })
    }
}
