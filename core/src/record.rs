//! Persistent record shapes: audit entries and dead letters.

use crate::bus::BusCoordinates;
use crate::envelope::{EventEnvelope, EventId};
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};

/// The canonical audit entry, ready for insertion.
///
/// Created once at successful ingestion and never mutated. `event_data`
/// holds the payload span exactly as the producer serialized it; the
/// store must not re-serialize it on the way in or out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Globally unique event id (natural key).
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
    /// Bus coordinates of the ingested message.
    pub coords: BusCoordinates,
    /// Opaque payload bytes, exactly as received.
    pub event_data: Vec<u8>,
    /// Optional trace correlation id.
    pub correlation_id: Option<String>,
    /// Optional causation id.
    pub causation_id: Option<String>,
    /// Optional acting user.
    pub user_id: Option<String>,
}

impl EventRecord {
    /// Build a record from a validated envelope and its bus coordinates.
    #[must_use]
    pub fn from_envelope(envelope: EventEnvelope, coords: BusCoordinates) -> Self {
        Self {
            event_id: envelope.event_id,
            event_type: envelope.event_type,
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type,
            version: envelope.version,
            timestamp: envelope.timestamp,
            source: envelope.source,
            coords,
            event_data: envelope.payload.get().as_bytes().to_vec(),
            correlation_id: envelope.correlation_id,
            causation_id: envelope.causation_id,
            user_id: envelope.user_id,
        }
    }
}

/// An audit entry as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    /// Store-assigned monotonic id.
    pub id: i64,
    /// The record as inserted.
    pub record: EventRecord,
    /// Ingestion wall-clock time.
    pub created_at: DateTime<Utc>,
}

/// Everything the dead-letter store captures about a refused message.
///
/// Carries enough to reconstruct the original delivery byte-for-byte for
/// operator-driven replay.
#[derive(Clone, Debug)]
pub struct RejectedMessage {
    /// Where the message came from.
    pub coords: BusCoordinates,
    /// Message key as delivered.
    pub key: Option<Vec<u8>>,
    /// Transport headers as delivered.
    pub headers: Vec<(String, Vec<u8>)>,
    /// Raw payload bytes as delivered.
    pub payload: Vec<u8>,
    /// The schema the router resolved, if routing got that far.
    pub schema_attempted: Option<String>,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Stack-trace-free failure summary.
    pub detail: String,
    /// When the pipeline first refused this message.
    pub first_seen: DateTime<Utc>,
}

/// A dead-letter row as read back from the store.
#[derive(Clone, Debug)]
pub struct DeadLetterRecord {
    /// Store-assigned id, used by replay tooling.
    pub id: i64,
    /// The captured rejection.
    pub rejected: RejectedMessage,
    /// Operator-driven replay attempts so far.
    pub retry_count: i32,
    /// Outcome string of the most recent replay attempt.
    pub last_retry_outcome: Option<String>,
}

impl DeadLetterRecord {
    /// Reconstruct the original bus delivery for replay.
    #[must_use]
    pub fn to_raw_message(&self) -> crate::bus::RawMessage {
        crate::bus::RawMessage {
            coords: self.rejected.coords.clone(),
            key: self.rejected.key.clone(),
            headers: self.rejected.headers.clone(),
            payload: self.rejected.payload.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::decode;
    use crate::schema::SchemaDescriptor;
    use crate::validate::Validator;
    use std::sync::Arc;

    #[test]
    fn event_data_is_the_exact_payload_span() {
        let bytes = br#"{
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "OrderCreated",
            "aggregate_id": "ORD-1",
            "aggregate_type": "Order",
            "version": 1,
            "timestamp": "2024-01-01T00:00:00Z",
            "source": "orders-svc",
            "payload": {"total":  99.95, "unknown": null}
        }"#;
        let wire = decode(bytes).unwrap();
        let envelope = Validator::new(Arc::new(crate::clock::SystemClock))
            .with_skew(chrono::Duration::days(365 * 50), chrono::Duration::minutes(5))
            .validate(wire, &SchemaDescriptor::new("OrderCreated"))
            .unwrap();
        let record = EventRecord::from_envelope(
            envelope,
            BusCoordinates::new("orders.order.created", 0, 42),
        );
        // Whitespace quirks and unknown fields survive untouched.
        assert_eq!(record.event_data, br#"{"total":  99.95, "unknown": null}"#);
    }
}
