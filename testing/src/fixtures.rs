//! Canonical envelope and message fixtures.
//!
//! The defaults mirror the happy-path order-created message so tests can
//! override only what they exercise.

use audit_trail_core::bus::{BusCoordinates, RawMessage};
use serde_json::json;

/// Fluent builder for producer envelopes.
#[derive(Clone, Debug)]
pub struct EnvelopeBuilder {
    event_id: Option<String>,
    event_type: Option<String>,
    aggregate_id: Option<String>,
    aggregate_type: Option<String>,
    version: Option<i64>,
    timestamp: Option<String>,
    source: Option<String>,
    correlation_id: Option<String>,
    payload: Option<serde_json::Value>,
}

impl EnvelopeBuilder {
    /// A well-formed `OrderCreated` envelope for `(Order, ORD-1)` v1.
    #[must_use]
    pub fn order_created() -> Self {
        Self {
            event_id: Some("11111111-1111-1111-1111-111111111111".to_string()),
            event_type: Some("OrderCreated".to_string()),
            aggregate_id: Some("ORD-1".to_string()),
            aggregate_type: Some("Order".to_string()),
            version: Some(1),
            timestamp: Some("2024-01-01T00:00:00Z".to_string()),
            source: Some("orders-svc".to_string()),
            correlation_id: None,
            payload: Some(json!({"total": 99.95, "currency": "EUR"})),
        }
    }

    /// Set the event id.
    #[must_use]
    pub fn event_id(mut self, id: &str) -> Self {
        self.event_id = Some(id.to_string());
        self
    }

    /// Drop the event id entirely (validation-failure fixtures).
    #[must_use]
    pub fn without_event_id(mut self) -> Self {
        self.event_id = None;
        self
    }

    /// Set the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_type = Some(event_type.to_string());
        self
    }

    /// Set the aggregate identity.
    #[must_use]
    pub fn aggregate(mut self, id: &str, kind: &str) -> Self {
        self.aggregate_id = Some(id.to_string());
        self.aggregate_type = Some(kind.to_string());
        self
    }

    /// Set the aggregate version.
    #[must_use]
    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the producer timestamp (RFC 3339).
    #[must_use]
    pub fn timestamp(mut self, rfc3339: &str) -> Self {
        self.timestamp = Some(rfc3339.to_string());
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_string());
        self
    }

    /// Replace the payload object.
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize to envelope JSON bytes.
    ///
    /// # Panics
    ///
    /// Panics if the payload fixture cannot be serialized (misuse).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn build_json(&self) -> Vec<u8> {
        let mut envelope = serde_json::Map::new();
        let mut put = |key: &str, value: Option<serde_json::Value>| {
            if let Some(value) = value {
                envelope.insert(key.to_string(), value);
            }
        };
        put("event_id", self.event_id.clone().map(Into::into));
        put("event_type", self.event_type.clone().map(Into::into));
        put("aggregate_id", self.aggregate_id.clone().map(Into::into));
        put("aggregate_type", self.aggregate_type.clone().map(Into::into));
        put("version", self.version.map(Into::into));
        put("timestamp", self.timestamp.clone().map(Into::into));
        put("source", self.source.clone().map(Into::into));
        put("correlation_id", self.correlation_id.clone().map(Into::into));
        put("payload", self.payload.clone());
        serde_json::to_vec(&serde_json::Value::Object(envelope))
            .expect("fixture envelope must serialize")
    }

    /// Wrap the envelope in a bus delivery at the given coordinates.
    #[must_use]
    pub fn into_message(self, topic: &str, partition: i32, offset: i64) -> RawMessage {
        let key = self.aggregate_id.clone().map(String::into_bytes);
        RawMessage {
            coords: BusCoordinates::new(topic, partition, offset),
            key,
            headers: Vec::new(),
            payload: self.build_json(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use audit_trail_core::envelope::decode;

    #[test]
    fn default_fixture_decodes() {
        let wire = decode(&EnvelopeBuilder::order_created().build_json()).unwrap();
        assert_eq!(wire.event_type.as_deref(), Some("OrderCreated"));
        assert_eq!(wire.version, Some(1));
    }

    #[test]
    fn without_event_id_omits_the_key() {
        let wire = decode(&EnvelopeBuilder::order_created().without_event_id().build_json())
            .unwrap();
        assert!(wire.event_id.is_none());
    }

    #[test]
    fn message_key_is_the_aggregate_id() {
        let message = EnvelopeBuilder::order_created().into_message("orders.order.created", 0, 1);
        assert_eq!(message.key.as_deref(), Some(b"ORD-1".as_slice()));
    }
}
