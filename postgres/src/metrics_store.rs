//! Batched per-message metric inserts.

use crate::error::classify_sqlx_error;
use audit_trail_core::error::StoreError;
use audit_trail_core::metric::MetricSample;
use audit_trail_core::store::{BoxFuture, MetricsStore};
use sqlx::{PgPool, QueryBuilder};

/// `PostgreSQL` metrics store. One multi-row insert per drained batch.
pub struct PostgresMetricsStore {
    pool: PgPool,
}

impl PostgresMetricsStore {
    /// Create a metrics store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MetricsStore for PostgresMetricsStore {
    fn append_batch<'a>(
        &'a self,
        samples: &'a [MetricSample],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if samples.is_empty() {
                return Ok(());
            }

            let mut builder: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO metrics (event_type, topic, outcome, processing_time_ms, created_at) ",
            );
            builder.push_values(samples, |mut row, sample| {
                row.push_bind(&sample.event_type)
                    .push_bind(&sample.topic)
                    .push_bind(sample.outcome.as_str())
                    .push_bind(i64::try_from(sample.duration.as_millis()).unwrap_or(i64::MAX))
                    .push_bind(sample.recorded_at);
            });

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;

            tracing::trace!(count = samples.len(), "metric batch inserted");
            Ok(())
        })
    }
}
