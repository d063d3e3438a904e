//! Error taxonomy for the ingestion path.
//!
//! Two families: [`IngestError`] classifies why a message was refused
//! (these become dead-letter rows and the partition advances), and
//! [`StoreError`] classifies storage failures (transient ones are retried
//! with backoff, exhaustion dead-letters the message). Duplicates are not
//! errors at all; see [`PersistOutcome`].

use crate::envelope::DecodeError;
use crate::metric::ProcessingOutcome;
use crate::validate::ValidationError;
use thiserror::Error;

/// Dead-letter classification, stored as a stable string in the
/// `error_kind` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The topic has no registered schema (configuration fault).
    UnknownTopic,
    /// The bytes could not be read as an envelope.
    Deserialize,
    /// The envelope or payload failed structural validation.
    Validation,
    /// A different `event_id` already claims this aggregate version
    /// (producer bug).
    VersionConflict,
    /// The store kept failing after all retries.
    StoreFailed,
}

impl ErrorKind {
    /// Stable database string for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTopic => "unknown_topic",
            Self::Deserialize => "deserialize_error",
            Self::Validation => "validation_error",
            Self::VersionConflict => "version_conflict",
            Self::StoreFailed => "store_failed",
        }
    }

    /// The metric outcome bucket a rejection of this kind lands in.
    #[must_use]
    pub const fn processing_outcome(&self) -> ProcessingOutcome {
        match self {
            Self::UnknownTopic => ProcessingOutcome::Unknown,
            Self::Deserialize | Self::Validation => ProcessingOutcome::ValidationFailed,
            Self::VersionConflict | Self::StoreFailed => ProcessingOutcome::PersistFailed,
        }
    }

    /// Parse a kind from its database string.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input if it matches no known kind.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "unknown_topic" => Ok(Self::UnknownTopic),
            "deserialize_error" => Ok(Self::Deserialize),
            "validation_error" => Ok(Self::Validation),
            "version_conflict" => Ok(Self::VersionConflict),
            "store_failed" => Ok(Self::StoreFailed),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was refused before it reached the store.
#[derive(Error, Debug)]
pub enum IngestError {
    /// No schema registered for the topic.
    #[error("no schema registered for topic {topic}")]
    UnknownTopic {
        /// The unregistered topic.
        topic: String,
    },

    /// Envelope deserialization failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Structural validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl IngestError {
    /// The dead-letter classification for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTopic { .. } => ErrorKind::UnknownTopic,
            Self::Decode(_) => ErrorKind::Deserialize,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Storage failure, classified for the retry policy.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Recoverable failure (connection loss, pool timeout, deadlock);
    /// the dispatcher retries with backoff.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Non-recoverable failure; retrying cannot help.
    #[error("store error: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether the retry policy should keep trying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result of a persist attempt that reached the store.
///
/// All three variants advance the partition cursor; `VersionConflict`
/// additionally dead-letters the message because it is evidence of a
/// producer bug, not of anything this pipeline can fix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new audit row was written.
    Committed,
    /// A row with this `event_id` already exists; nothing was written.
    Duplicate,
    /// The aggregate version is already claimed by a different
    /// `event_id`; nothing was written.
    VersionConflict,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_round_trip() {
        for kind in [
            ErrorKind::UnknownTopic,
            ErrorKind::Deserialize,
            ErrorKind::Validation,
            ErrorKind::VersionConflict,
            ErrorKind::StoreFailed,
        ] {
            let parsed = ErrorKind::parse(kind.as_str()).expect("valid kind should parse");
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn error_kind_rejects_unknown() {
        assert!(ErrorKind::parse("no_such_kind").is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Transient("pool timeout".into()).is_transient());
        assert!(!StoreError::Fatal("schema missing".into()).is_transient());
    }

    #[test]
    fn rejection_kinds_map_to_metric_buckets() {
        use crate::metric::ProcessingOutcome;

        assert_eq!(
            ErrorKind::UnknownTopic.processing_outcome(),
            ProcessingOutcome::Unknown
        );
        assert_eq!(
            ErrorKind::Validation.processing_outcome(),
            ProcessingOutcome::ValidationFailed
        );
        assert_eq!(
            ErrorKind::StoreFailed.processing_outcome(),
            ProcessingOutcome::PersistFailed
        );
    }
}
