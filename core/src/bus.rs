//! Bus-facing types: partition coordinates and the raw delivery.
//!
//! These types are deliberately transport-neutral. The Kafka consumer
//! produces them; nothing downstream of the consumer touches rdkafka.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The provenance triple of a message on the partitioned bus.
///
/// Every audit row and every dead-letter row carries its coordinates so
/// the original delivery is always recoverable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusCoordinates {
    /// Topic the message arrived on (e.g. `orders.order.created`).
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl BusCoordinates {
    /// Create coordinates from their parts.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// The offset the partition cursor moves to once this message is
    /// accounted for (persisted or dead-lettered).
    #[must_use]
    pub const fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

impl fmt::Display for BusCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A message exactly as the bus delivered it.
///
/// The payload bytes are never re-encoded on their way to the store;
/// byte-for-byte fidelity is what makes dead-letter replay and any future
/// payload signing possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    /// Where the message came from.
    pub coords: BusCoordinates,
    /// Message key, if the producer set one (by convention the
    /// aggregate id, which gives per-aggregate partition affinity).
    pub key: Option<Vec<u8>>,
    /// Transport headers as delivered.
    pub headers: Vec<(String, Vec<u8>)>,
    /// The payload bytes as delivered.
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Create a message with no key and no headers.
    #[must_use]
    pub fn new(coords: BusCoordinates, payload: Vec<u8>) -> Self {
        Self {
            coords,
            key: None,
            headers: Vec::new(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_display() {
        let coords = BusCoordinates::new("orders.order.created", 3, 42);
        assert_eq!(coords.to_string(), "orders.order.created[3]@42");
    }

    #[test]
    fn next_offset_is_offset_plus_one() {
        let coords = BusCoordinates::new("orders.order.created", 0, 42);
        assert_eq!(coords.next_offset(), 43);
    }
}
