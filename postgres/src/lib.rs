//! # Audit Trail Postgres
//!
//! `PostgreSQL` implementations of the audit trail's storage seams:
//!
//! - [`PostgresAuditStore`]: the transactional persister (event insert
//!   plus co-located cursor advance in one transaction)
//! - [`PostgresDeadLetterStore`]: the dead-letter sink and replay reads
//! - [`PostgresCursorStore`]: monotonic partition cursors
//! - [`PostgresMetricsStore`]: batched per-message metric inserts
//! - [`PostgresAuditLog`]: system-actor batch-commit entries
//!
//! All of them share one [`PgPool`]; the pool's bounds are the pipeline's
//! backpressure signal: partition tasks block on acquisition when the
//! store falls behind.
//!
//! # Example
//!
//! ```no_run
//! use audit_trail_core::config::StoreConfig;
//! use audit_trail_postgres::{PostgresAuditStore, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect(&StoreConfig::default()).await?;
//! migrate(&pool).await?;
//! let store = PostgresAuditStore::new(pool, true);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod cursor;
mod dead_letter;
mod error;
mod metrics_store;
mod store;

pub use audit::PostgresAuditLog;
pub use cursor::PostgresCursorStore;
pub use dead_letter::PostgresDeadLetterStore;
pub use error::classify_sqlx_error;
pub use metrics_store::PostgresMetricsStore;
pub use store::PostgresAuditStore;

use audit_trail_core::config::StoreConfig;
use audit_trail_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::time::Duration;

/// Build the shared connection pool from store configuration.
///
/// # Errors
///
/// Returns [`StoreError::Fatal`] for an unparseable `ssl_mode` and a
/// classified error when the initial connection fails (startup treats any
/// of these as "store unreachable").
pub async fn connect(config: &StoreConfig) -> Result<PgPool, StoreError> {
    let ssl_mode: PgSslMode = config
        .ssl_mode
        .parse()
        .map_err(|e| StoreError::Fatal(format!("invalid ssl_mode {:?}: {e}", config.ssl_mode)))?;

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .password(&config.password)
        .ssl_mode(ssl_mode)
        .options([(
            "statement_timeout",
            format!("{}s", config.command_timeout_seconds),
        )]);

    let pool = PgPoolOptions::new()
        .min_connections(config.min_pool_size)
        .max_connections(config.max_pool_size)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect_with(options)
        .await
        .map_err(classify_sqlx_error)?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        min_pool = config.min_pool_size,
        max_pool = config.max_pool_size,
        "connected to audit store"
    );

    Ok(pool)
}

/// Apply the schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::Fatal`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Fatal(format!("migration failed: {e}")))
}
