//! System-actor audit log entries.

use crate::error::classify_sqlx_error;
use audit_trail_core::error::StoreError;
use audit_trail_core::store::{AuditLogStore, BoxFuture};
use sqlx::PgPool;

/// Actor name the ingester writes audit entries under.
const SYSTEM_ACTOR: &str = "ingest-pipeline";

/// `PostgreSQL` audit log.
///
/// The query surface writes most audit entries (who read or replayed
/// what); the ingester records exactly one entry per successful batch
/// commit so the legally authoritative record also covers the pipeline's
/// own actions.
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    /// Create an audit log over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditLogStore for PostgresAuditLog {
    fn record_batch_commit<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        through_offset: i64,
        message_count: u64,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let detail = serde_json::json!({
                "topic": topic,
                "partition": partition,
                "through_offset": through_offset,
                "message_count": message_count,
            });

            sqlx::query(
                r"
                INSERT INTO audit_log (actor, action, detail)
                VALUES ($1, 'batch_commit', $2)
                ",
            )
            .bind(SYSTEM_ACTOR)
            .bind(detail)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            Ok(())
        })
    }
}
