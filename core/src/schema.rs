//! Schema registry: the static topic → schema table.
//!
//! Event types are a tagged sum: a discriminator string plus a payload
//! whose shape is looked up by discriminator. The registry is populated
//! once at startup with the known topic set; resolution is a table
//! lookup, never subtype dispatch. A topic with no registration is a
//! configuration fault and the message is dead-lettered without stalling
//! the partition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Primitive JSON kinds a schema can require of a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    /// JSON string.
    String,
    /// JSON integer (a number with no fractional part).
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl PayloadKind {
    /// Whether `value` is of this kind.
    #[must_use]
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// Human-readable kind name for error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Declared shape of one event type's payload.
#[derive(Clone, Debug)]
pub struct SchemaDescriptor {
    /// The event type this descriptor describes (e.g. `OrderCreated`).
    pub event_type: String,
    /// Required payload keys and their primitive kinds.
    pub required: Vec<(&'static str, PayloadKind)>,
}

impl SchemaDescriptor {
    /// Create a descriptor with no required payload fields.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            required: Vec::new(),
        }
    }

    /// Require a payload field of the given kind.
    #[must_use]
    pub fn require(mut self, field: &'static str, kind: PayloadKind) -> Self {
        self.required.push((field, kind));
        self
    }
}

/// Static topic → schema table, populated at startup.
///
/// # Example
///
/// ```
/// use audit_trail_core::schema::{PayloadKind, SchemaDescriptor, SchemaRegistry};
///
/// let mut registry = SchemaRegistry::new();
/// registry.register(
///     "orders.order.created",
///     SchemaDescriptor::new("OrderCreated")
///         .require("total", PayloadKind::Number)
///         .require("currency", PayloadKind::String),
/// );
///
/// assert!(registry.resolve("orders.order.created").is_some());
/// assert!(registry.resolve("orders.order.deleted").is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    topics: HashMap<String, SchemaDescriptor>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic's schema. Re-registering a topic replaces the
    /// previous descriptor.
    pub fn register(&mut self, topic: impl Into<String>, descriptor: SchemaDescriptor) {
        self.topics.insert(topic.into(), descriptor);
    }

    /// Resolve the schema for a topic. `None` means the topic was never
    /// declared, an `UnknownTopic` fault.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Option<&SchemaDescriptor> {
        self.topics.get(topic)
    }

    /// The registered topic names, for subscription.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether no topics are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_matching() {
        assert!(PayloadKind::String.matches(&json!("x")));
        assert!(PayloadKind::Integer.matches(&json!(3)));
        assert!(!PayloadKind::Integer.matches(&json!(3.5)));
        assert!(PayloadKind::Number.matches(&json!(3.5)));
        assert!(PayloadKind::Boolean.matches(&json!(true)));
        assert!(PayloadKind::Object.matches(&json!({})));
        assert!(PayloadKind::Array.matches(&json!([])));
        assert!(!PayloadKind::String.matches(&json!(1)));
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            "orders.order.created",
            SchemaDescriptor::new("OrderCreated").require("total", PayloadKind::Number),
        );

        let descriptor = registry.resolve("orders.order.created");
        assert_eq!(descriptor.map(|d| d.event_type.as_str()), Some("OrderCreated"));
        assert!(registry.resolve("payments.payment.captured").is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = SchemaRegistry::new();
        registry.register("t", SchemaDescriptor::new("A"));
        registry.register("t", SchemaDescriptor::new("B"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve("t").map(|d| d.event_type.as_str()),
            Some("B")
        );
    }
}
