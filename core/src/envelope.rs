//! Message envelope: the producer contract and its deserializer.
//!
//! Producers wrap every event in a fixed JSON framing (the envelope) with
//! an event-type-specific `payload` object inside. Deserialization here is
//! deliberately loose: every field is optional and unknown fields are
//! ignored, because *missing* fields are a validation concern with their
//! own error taxonomy, not a parse failure. Only malformed input (invalid
//! UTF-8, broken JSON, a scalar of the wrong JSON type) is a
//! deserialization error.
//!
//! The `payload` is captured as a raw JSON span ([`RawValue`]) so unknown
//! payload fields survive verbatim and the stored bytes are exactly the
//! producer's bytes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Globally unique event identifier, supplied by the producer.
///
/// This is the idempotency key of the whole pipeline: re-deliveries of the
/// same `EventId` collapse into a single audit row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Wrap an already-validated UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing an [`EventId`] from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid event id: {0}")]
pub struct ParseEventIdError(String);

impl FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ParseEventIdError(e.to_string()))
    }
}

/// The envelope as it comes off the wire, before validation.
///
/// Every field is optional: producers that omit a required field get a
/// [`crate::validate::ValidationError`] naming the field, not an opaque
/// parse error. Unknown envelope fields are ignored (forward
/// compatibility); the payload span preserves unknown payload fields
/// verbatim.
#[derive(Debug, Deserialize)]
pub struct WireEnvelope {
    /// Producer-supplied globally unique id, as text.
    pub event_id: Option<String>,
    /// Event type discriminator (e.g. `OrderCreated`).
    pub event_type: Option<String>,
    /// Aggregate instance identifier.
    pub aggregate_id: Option<String>,
    /// Aggregate kind (e.g. `Order`).
    pub aggregate_type: Option<String>,
    /// Per-aggregate monotonic version, starting at 1.
    pub version: Option<i64>,
    /// Producer wall-clock timestamp, UTC.
    pub timestamp: Option<DateTime<Utc>>,
    /// Producing service name.
    pub source: Option<String>,
    /// Optional trace correlation id.
    pub correlation_id: Option<String>,
    /// Optional causation id (the event that caused this one).
    pub causation_id: Option<String>,
    /// Optional acting user.
    pub user_id: Option<String>,
    /// Event-type-specific payload, kept as the raw JSON span.
    pub payload: Option<Box<RawValue>>,
}

/// A fully validated envelope, ready to become an audit record.
///
/// Produced only by [`crate::validate::Validator::validate`]; construction
/// elsewhere would bypass the structural checks.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Globally unique event id.
    pub event_id: EventId,
    /// Event type discriminator.
    pub event_type: String,
    /// Aggregate instance identifier.
    pub aggregate_id: String,
    /// Aggregate kind.
    pub aggregate_type: String,
    /// Per-aggregate version, ≥ 1.
    pub version: i64,
    /// Producer timestamp, UTC.
    pub timestamp: DateTime<Utc>,
    /// Producing service name.
    pub source: String,
    /// Optional trace correlation id.
    pub correlation_id: Option<String>,
    /// Optional causation id.
    pub causation_id: Option<String>,
    /// Optional acting user.
    pub user_id: Option<String>,
    /// Payload as the raw JSON span from the wire.
    pub payload: Box<RawValue>,
}

/// Deserialization failure: the bytes could not be read as an envelope.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8 (valid up to byte {valid_up_to})")]
    Utf8 {
        /// Length of the valid prefix, in bytes.
        valid_up_to: usize,
    },

    /// Payload is not a well-formed envelope.
    #[error("malformed envelope at line {line}, column {column}: {detail}")]
    Json {
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
        /// Parser detail message.
        detail: String,
    },
}

/// Parse raw message bytes into a [`WireEnvelope`].
///
/// Goes through `str` rather than the slice deserializer so the payload
/// span can be borrowed as a [`RawValue`] and stored byte-for-byte.
///
/// # Errors
///
/// Returns [`DecodeError`] for invalid UTF-8 or malformed JSON, with the
/// failure position when the parser provides one.
pub fn decode(bytes: &[u8]) -> Result<WireEnvelope, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
        valid_up_to: e.valid_up_to(),
    })?;

    serde_json::from_str(text).map_err(|e| DecodeError::Json {
        line: e.line(),
        column: e.column(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "event_id": "11111111-1111-1111-1111-111111111111",
        "event_type": "OrderCreated",
        "aggregate_id": "ORD-1",
        "aggregate_type": "Order",
        "version": 1,
        "timestamp": "2024-01-01T00:00:00Z",
        "source": "orders-svc",
        "payload": {"total": 99.95, "currency": "EUR", "extra_field": true}
    }"#;

    #[test]
    fn decode_full_envelope() {
        let wire = decode(FULL.as_bytes()).expect("well-formed envelope");
        assert_eq!(wire.event_type.as_deref(), Some("OrderCreated"));
        assert_eq!(wire.version, Some(1));
        assert!(wire.correlation_id.is_none());
    }

    #[test]
    fn payload_span_is_preserved_verbatim() {
        let wire = decode(FULL.as_bytes()).unwrap();
        let payload = wire.payload.expect("payload present");
        // Unknown fields and the exact textual form survive.
        assert_eq!(
            payload.get(),
            r#"{"total": 99.95, "currency": "EUR", "extra_field": true}"#
        );
    }

    #[test]
    fn missing_fields_decode_as_none() {
        let wire = decode(br#"{"event_type": "OrderCreated"}"#).unwrap();
        assert!(wire.event_id.is_none());
        assert!(wire.payload.is_none());
    }

    #[test]
    fn unknown_envelope_fields_are_ignored() {
        let wire = decode(br#"{"event_type": "OrderCreated", "not_a_field": 1}"#).unwrap();
        assert_eq!(wire.event_type.as_deref(), Some("OrderCreated"));
    }

    #[test]
    fn broken_json_reports_position() {
        let err = decode(b"{\"event_type\": ").unwrap_err();
        match err {
            DecodeError::Json { line, .. } => assert_eq!(line, 1),
            DecodeError::Utf8 { .. } => panic!("expected Json error"),
        }
    }

    #[test]
    fn invalid_utf8_reports_valid_prefix() {
        let err = decode(&[b'{', 0xFF, 0xFE]).unwrap_err();
        match err {
            DecodeError::Utf8 { valid_up_to } => assert_eq!(valid_up_to, 1),
            DecodeError::Json { .. } => panic!("expected Utf8 error"),
        }
    }

    #[test]
    fn event_id_parse_round_trip() {
        let id: EventId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        assert_eq!(id.to_string(), "11111111-1111-1111-1111-111111111111");
        assert!("not-a-uuid".parse::<EventId>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn event_id_display_parses_back(raw in proptest::prelude::any::<u128>()) {
            let id = EventId::new(Uuid::from_u128(raw));
            let parsed: EventId = id.to_string().parse().unwrap();
            proptest::prop_assert_eq!(id, parsed);
        }
    }
}
