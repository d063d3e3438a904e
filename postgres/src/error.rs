//! sqlx error classification for the retry policy.

use audit_trail_core::error::StoreError;

/// Classify a sqlx error as transient (worth retrying with backoff) or
/// fatal.
///
/// Transient: pool exhaustion/closure, I/O and connection-class failures
/// (SQLSTATE `08xxx`), serialization failures and deadlocks (`40001`,
/// `40P01`), and server shutdown/unavailability (`57P0x`). Everything
/// else is fatal (constraint violations land here only if the persister
/// failed to recognize the constraint).
#[must_use]
pub fn classify_sqlx_error(error: sqlx::Error) -> StoreError {
    let transient = match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db.code().as_deref().is_some_and(|code| {
            code.starts_with("08")
                || code == "40001"
                || code == "40P01"
                || code.starts_with("57P")
        }),
        _ => false,
    };

    if transient {
        StoreError::Transient(error.to_string())
    } else {
        StoreError::Fatal(error.to_string())
    }
}
