//! # Audit Trail Testing
//!
//! Deterministic in-memory implementations of the storage seams plus
//! fixture builders, so pipeline behaviour can be tested without a
//! database or a broker.
//!
//! This crate provides:
//! - [`stores`]: in-memory [`audit_trail_core::store`] implementations
//!   with inspection helpers and transient-failure injection
//! - [`mocks::FixedClock`]: a pinned clock for skew-window tests
//! - [`fixtures`]: canonical envelope and message builders
//!
//! # Example
//!
//! ```
//! use audit_trail_testing::fixtures::EnvelopeBuilder;
//!
//! let message = EnvelopeBuilder::order_created()
//!     .aggregate("ORD-7", "Order")
//!     .version(3)
//!     .into_message("orders.order.created", 0, 42);
//! assert_eq!(message.coords.offset, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod mocks;
pub mod stores;

pub use fixtures::EnvelopeBuilder;
pub use mocks::FixedClock;
pub use stores::{
    InMemoryAuditLog, InMemoryAuditStore, InMemoryCursorStore, InMemoryDeadLetterStore,
    InMemoryMetricsStore,
};
