//! Monotonic partition cursor rows.

use crate::error::classify_sqlx_error;
use audit_trail_core::error::StoreError;
use audit_trail_core::store::{BoxFuture, CursorStore};
use sqlx::PgPool;

/// `PostgreSQL` partition cursor store.
///
/// The upsert takes `GREATEST` of the stored and offered offsets, so a
/// late or replayed writer can never rewind a cursor; rewinding is an
/// operator action done directly against the table.
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    /// Create a cursor store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CursorStore for PostgresCursorStore {
    fn load<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                r"
                SELECT next_offset
                FROM partition_cursors
                WHERE topic = $1 AND partition = $2
                ",
            )
            .bind(topic)
            .bind(partition)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            Ok(row.map(|(offset,)| offset))
        })
    }

    fn advance<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        next_offset: i64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO partition_cursors (topic, partition, next_offset, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (topic, partition) DO UPDATE
                SET next_offset = GREATEST(partition_cursors.next_offset, EXCLUDED.next_offset),
                    updated_at = now()
                ",
            )
            .bind(topic)
            .bind(partition)
            .bind(next_offset)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            Ok(())
        })
    }
}
