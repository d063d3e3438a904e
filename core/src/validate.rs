//! Structural envelope validation.
//!
//! Validation is structural, not semantic: field presence, well-formed
//! identifiers, a timestamp-skew window, version ≥ 1, and the payload
//! shape the schema descriptor declares. Anything deeper (does this order
//! exist, is the total plausible) is the producers' business. The audit
//! trail records what was said, not whether it was wise.

use crate::clock::Clock;
use crate::envelope::{EventEnvelope, EventId, WireEnvelope};
use crate::schema::SchemaDescriptor;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;

/// Stable validation failure codes, stored in dead-letter detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationCode {
    /// A required envelope field is absent.
    MissingField,
    /// A field is present but unparseable (e.g. `event_id` not a UUID).
    MalformedField,
    /// A required string field is empty.
    EmptyField,
    /// `version` < 1.
    VersionOutOfRange,
    /// `timestamp` outside the configured skew window.
    TimestampOutOfRange,
    /// The envelope's `event_type` does not match the topic's schema.
    EventTypeMismatch,
    /// The payload violates the declared shape.
    PayloadShape,
}

impl ValidationCode {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::MalformedField => "malformed_field",
            Self::EmptyField => "empty_field",
            Self::VersionOutOfRange => "version_out_of_range",
            Self::TimestampOutOfRange => "timestamp_out_of_range",
            Self::EventTypeMismatch => "event_type_mismatch",
            Self::PayloadShape => "payload_shape",
        }
    }
}

/// A structural validation failure: which check, which field, and why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed ({}) on field {field}: {message}", .code.as_str())]
pub struct ValidationError {
    /// Which check failed.
    pub code: ValidationCode,
    /// The offending field, dotted for payload fields (`payload.total`).
    pub field: String,
    /// Human-readable detail.
    pub message: String,
}

impl ValidationError {
    fn new(code: ValidationCode, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Envelope validator with a configurable timestamp-skew window.
#[derive(Clone)]
pub struct Validator {
    clock: Arc<dyn Clock>,
    max_skew_past: Duration,
    max_skew_future: Duration,
}

impl Validator {
    /// Create a validator with the default window: 30 days into the past,
    /// 5 minutes into the future.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_skew_past: Duration::days(30),
            max_skew_future: Duration::minutes(5),
        }
    }

    /// Override the skew window.
    #[must_use]
    pub fn with_skew(mut self, max_past: Duration, max_future: Duration) -> Self {
        self.max_skew_past = max_past;
        self.max_skew_future = max_future;
        self
    }

    /// Validate a wire envelope against its topic's schema, producing a
    /// typed [`EventEnvelope`].
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered, in field order:
    /// `event_id`, `event_type`, `aggregate_id`, `aggregate_type`,
    /// `source`, `version`, `timestamp`, then payload shape.
    pub fn validate(
        &self,
        wire: WireEnvelope,
        descriptor: &SchemaDescriptor,
    ) -> Result<EventEnvelope, ValidationError> {
        let event_id_text = require(wire.event_id, "event_id")?;
        let event_id: EventId = event_id_text.parse().map_err(|_| {
            ValidationError::new(
                ValidationCode::MalformedField,
                "event_id",
                format!("not a UUID: {event_id_text:?}"),
            )
        })?;

        let event_type = require_non_empty(wire.event_type, "event_type")?;
        if event_type != descriptor.event_type {
            return Err(ValidationError::new(
                ValidationCode::EventTypeMismatch,
                "event_type",
                format!(
                    "topic schema expects {:?}, envelope says {event_type:?}",
                    descriptor.event_type
                ),
            ));
        }

        let aggregate_id = require_non_empty(wire.aggregate_id, "aggregate_id")?;
        let aggregate_type = require_non_empty(wire.aggregate_type, "aggregate_type")?;
        let source = require_non_empty(wire.source, "source")?;

        let version = require(wire.version, "version")?;
        if version < 1 {
            return Err(ValidationError::new(
                ValidationCode::VersionOutOfRange,
                "version",
                format!("must be >= 1, got {version}"),
            ));
        }

        let timestamp = require(wire.timestamp, "timestamp")?;
        let now = self.clock.now();
        if timestamp < now - self.max_skew_past || timestamp > now + self.max_skew_future {
            return Err(ValidationError::new(
                ValidationCode::TimestampOutOfRange,
                "timestamp",
                format!(
                    "{timestamp} outside [{} .. {}]",
                    now - self.max_skew_past,
                    now + self.max_skew_future
                ),
            ));
        }

        let payload = wire.payload.ok_or_else(|| {
            ValidationError::new(ValidationCode::MissingField, "payload", "field is required")
        })?;
        check_payload_shape(payload.get(), descriptor)?;

        Ok(EventEnvelope {
            event_id,
            event_type,
            aggregate_id,
            aggregate_type,
            version,
            timestamp,
            source,
            correlation_id: wire.correlation_id,
            causation_id: wire.causation_id,
            user_id: wire.user_id,
            payload,
        })
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, ValidationError> {
    value.ok_or_else(|| {
        ValidationError::new(ValidationCode::MissingField, field, "field is required")
    })
}

fn require_non_empty(value: Option<String>, field: &str) -> Result<String, ValidationError> {
    let value = require(value, field)?;
    if value.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::EmptyField,
            field,
            "field must not be empty",
        ));
    }
    Ok(value)
}

/// Check the raw payload span against the descriptor's required keys.
///
/// Re-parses the span into a `Value` for shape probing only; the span
/// itself is what gets stored.
fn check_payload_shape(raw: &str, descriptor: &SchemaDescriptor) -> Result<(), ValidationError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        ValidationError::new(ValidationCode::PayloadShape, "payload", e.to_string())
    })?;

    let serde_json::Value::Object(object) = value else {
        return Err(ValidationError::new(
            ValidationCode::PayloadShape,
            "payload",
            "payload must be a JSON object",
        ));
    };

    for (name, kind) in &descriptor.required {
        match object.get(*name) {
            None => {
                return Err(ValidationError::new(
                    ValidationCode::PayloadShape,
                    format!("payload.{name}"),
                    "required key is missing",
                ));
            }
            Some(found) if !kind.matches(found) => {
                return Err(ValidationError::new(
                    ValidationCode::PayloadShape,
                    format!("payload.{name}"),
                    format!("expected {}", kind.as_str()),
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::decode;
    use crate::schema::PayloadKind;
    use chrono::{DateTime, Utc};

    /// Clock pinned to 2024-01-01T12:00:00Z.
    struct TestClock;

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            "2024-01-01T12:00:00Z".parse().unwrap()
        }
    }

    fn validator() -> Validator {
        Validator::new(Arc::new(TestClock))
    }

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor::new("OrderCreated")
            .require("total", PayloadKind::Number)
            .require("currency", PayloadKind::String)
    }

    fn envelope_json(overrides: &[(&str, serde_json::Value)]) -> Vec<u8> {
        let mut base = serde_json::json!({
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "OrderCreated",
            "aggregate_id": "ORD-1",
            "aggregate_type": "Order",
            "version": 1,
            "timestamp": "2024-01-01T00:00:00Z",
            "source": "orders-svc",
            "payload": {"total": 99.95, "currency": "EUR"}
        });
        for (key, value) in overrides {
            match value {
                serde_json::Value::Null => {
                    base.as_object_mut().unwrap().remove(*key);
                }
                other => {
                    base[*key] = other.clone();
                }
            }
        }
        serde_json::to_vec(&base).unwrap()
    }

    fn validate_bytes(bytes: &[u8]) -> Result<EventEnvelope, ValidationError> {
        let wire = decode(bytes).expect("fixture must decode");
        validator().validate(wire, &descriptor())
    }

    #[test]
    fn accepts_well_formed_envelope() {
        let envelope = validate_bytes(&envelope_json(&[])).expect("valid envelope");
        assert_eq!(envelope.aggregate_id, "ORD-1");
        assert_eq!(envelope.version, 1);
    }

    #[test]
    fn missing_event_id_names_the_field() {
        let err = validate_bytes(&envelope_json(&[("event_id", serde_json::Value::Null)]))
            .unwrap_err();
        assert_eq!(err.code, ValidationCode::MissingField);
        assert_eq!(err.field, "event_id");
    }

    #[test]
    fn malformed_event_id_is_rejected() {
        let err = validate_bytes(&envelope_json(&[(
            "event_id",
            serde_json::json!("not-a-uuid"),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::MalformedField);
    }

    #[test]
    fn version_zero_is_rejected() {
        let err =
            validate_bytes(&envelope_json(&[("version", serde_json::json!(0))])).unwrap_err();
        assert_eq!(err.code, ValidationCode::VersionOutOfRange);
    }

    #[test]
    fn empty_aggregate_id_is_rejected() {
        let err = validate_bytes(&envelope_json(&[("aggregate_id", serde_json::json!(""))]))
            .unwrap_err();
        assert_eq!(err.code, ValidationCode::EmptyField);
        assert_eq!(err.field, "aggregate_id");
    }

    #[test]
    fn timestamp_too_far_past_is_rejected() {
        // 31 days before the pinned clock, window is 30 days.
        let err = validate_bytes(&envelope_json(&[(
            "timestamp",
            serde_json::json!("2023-12-01T11:00:00Z"),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::TimestampOutOfRange);
    }

    #[test]
    fn timestamp_slightly_future_is_accepted() {
        // 4 minutes ahead, window allows 5.
        validate_bytes(&envelope_json(&[(
            "timestamp",
            serde_json::json!("2024-01-01T12:04:00Z"),
        )]))
        .expect("within future skew");
    }

    #[test]
    fn timestamp_too_far_future_is_rejected() {
        let err = validate_bytes(&envelope_json(&[(
            "timestamp",
            serde_json::json!("2024-01-01T12:06:00Z"),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::TimestampOutOfRange);
    }

    #[test]
    fn event_type_must_match_topic_schema() {
        let err = validate_bytes(&envelope_json(&[(
            "event_type",
            serde_json::json!("OrderCancelled"),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::EventTypeMismatch);
    }

    #[test]
    fn missing_required_payload_key_is_rejected() {
        let err = validate_bytes(&envelope_json(&[(
            "payload",
            serde_json::json!({"total": 1.0}),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::PayloadShape);
        assert_eq!(err.field, "payload.currency");
    }

    #[test]
    fn wrong_payload_kind_is_rejected() {
        let err = validate_bytes(&envelope_json(&[(
            "payload",
            serde_json::json!({"total": "lots", "currency": "EUR"}),
        )]))
        .unwrap_err();
        assert_eq!(err.code, ValidationCode::PayloadShape);
        assert_eq!(err.field, "payload.total");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err =
            validate_bytes(&envelope_json(&[("payload", serde_json::json!([1, 2]))])).unwrap_err();
        assert_eq!(err.code, ValidationCode::PayloadShape);
        assert_eq!(err.field, "payload");
    }

    #[test]
    fn optional_trace_fields_pass_through() {
        let envelope = validate_bytes(&envelope_json(&[(
            "correlation_id",
            serde_json::json!("corr-7"),
        )]))
        .unwrap();
        assert_eq!(envelope.correlation_id.as_deref(), Some("corr-7"));
        assert!(envelope.causation_id.is_none());
    }
}
