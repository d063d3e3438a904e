//! Operator-driven dead-letter replay.
//!
//! The dead-letter store is an inspection surface, not a retry queue:
//! nothing here runs automatically. An operator picks an entry, the
//! replayer reconstructs the original delivery byte-for-byte and pushes
//! it back through the dispatcher. The entry itself is never deleted;
//! every attempt bumps its retry counter and records the outcome.

use crate::dispatcher::{Dispatcher, Disposition};
use audit_trail_core::error::{ErrorKind, StoreError};
use audit_trail_core::store::DeadLetterStore;
use std::sync::Arc;

/// Result of one replay attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The event now exists in the store (the original failure was
    /// transient, or an operator fixed the schema registration).
    Persisted,
    /// A row with this `event_id` already existed; re-ingestion was a
    /// no-op. Only reported distinctly when `force_reprocess` is set.
    AlreadyPersisted,
    /// The message was refused again, deterministically.
    RejectedAgain(ErrorKind),
}

impl ReplayOutcome {
    /// Outcome string recorded on the dead-letter row. `"persisted"`
    /// marks the entry as successfully replayed.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Persisted => "persisted".to_string(),
            Self::AlreadyPersisted => "already_persisted".to_string(),
            Self::RejectedAgain(kind) => format!("rejected:{kind}"),
        }
    }
}

/// Re-injects dead letters into the dispatcher on operator request.
pub struct DlqReplayer {
    dead_letters: Arc<dyn DeadLetterStore>,
    dispatcher: Arc<Dispatcher>,
}

impl DlqReplayer {
    /// Create a replayer over the given store and dispatcher.
    #[must_use]
    pub fn new(dead_letters: Arc<dyn DeadLetterStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dead_letters,
            dispatcher,
        }
    }

    /// Replay one dead letter by id.
    ///
    /// With `force_reprocess` unset, an `event_id` that already exists in
    /// the store counts as [`ReplayOutcome::Persisted`], duplicate
    /// suppression as on the hot path. Setting it surfaces the no-op as
    /// [`ReplayOutcome::AlreadyPersisted`] instead, so an operator can
    /// tell a real re-ingestion from one the store absorbed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Fatal`] for an unknown id, and propagates
    /// store failures from the dispatch or the bookkeeping update. The
    /// dead-letter row is only updated when a disposition was reached.
    pub async fn replay(
        &self,
        id: i64,
        force_reprocess: bool,
    ) -> Result<ReplayOutcome, StoreError> {
        let Some(record) = self.dead_letters.fetch(id).await? else {
            return Err(StoreError::Fatal(format!("no dead letter with id {id}")));
        };

        let message = record.to_raw_message();
        tracing::info!(
            dlq_id = id,
            coords = %message.coords,
            kind = %record.rejected.kind,
            retry_count = record.retry_count,
            force_reprocess,
            "replaying dead letter"
        );

        let disposition = self.dispatcher.dispatch_replay(&message).await?;
        let outcome = match disposition {
            Disposition::Persisted { duplicate: false } => ReplayOutcome::Persisted,
            Disposition::Persisted { duplicate: true } => {
                if force_reprocess {
                    ReplayOutcome::AlreadyPersisted
                } else {
                    ReplayOutcome::Persisted
                }
            }
            Disposition::DeadLettered { kind } => ReplayOutcome::RejectedAgain(kind),
        };

        self.dead_letters
            .record_replay_attempt(id, &outcome.label())
            .await?;

        tracing::info!(dlq_id = id, outcome = %outcome.label(), "replay attempt recorded");
        metrics::counter!("audit_ingest_dlq_replays_total").increment(1);

        Ok(outcome)
    }
}
