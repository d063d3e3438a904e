//! # Audit Trail Core
//!
//! Domain types and seam traits for the order audit trail ingestion
//! pipeline.
//!
//! This crate defines everything the pipeline stages agree on without
//! committing to a transport or a database:
//!
//! - **Bus types**: [`bus::BusCoordinates`] and [`bus::RawMessage`], the
//!   untouched delivery from the partitioned event bus.
//! - **Envelope**: [`envelope::WireEnvelope`] (loose decode target) and
//!   [`envelope::EventEnvelope`] (validated), plus the deserializer.
//! - **Schema registry**: [`schema::SchemaRegistry`], the static
//!   topic → schema table that the dispatcher routes through.
//! - **Validator**: [`validate::Validator`], structural envelope and
//!   payload-shape checks.
//! - **Records**: [`record::EventRecord`] (the canonical audit entry) and
//!   [`record::RejectedMessage`] (the dead-letter entry).
//! - **Error taxonomy**: [`error::ErrorKind`], [`error::IngestError`],
//!   [`error::StoreError`], [`error::PersistOutcome`].
//! - **Store traits**: [`store::EventStore`], [`store::DeadLetterStore`],
//!   [`store::CursorStore`], [`store::MetricsStore`],
//!   [`store::AuditLogStore`], implemented by `audit-trail-postgres` for
//!   production and `audit-trail-testing` in memory.
//! - **Configuration**: [`config::IngestConfig`] and friends.
//!
//! # Design
//!
//! The audit log is append-only and legally authoritative: event rows are
//! never updated or deleted, payload bytes are stored exactly as the bus
//! delivered them, and `event_id` uniqueness is the idempotency anchor
//! that turns at-least-once bus delivery into effectively-exactly-once
//! persistence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod metric;
pub mod record;
pub mod schema;
pub mod store;
pub mod validate;

pub use bus::{BusCoordinates, RawMessage};
pub use clock::{Clock, SystemClock};
pub use envelope::{EventEnvelope, EventId, WireEnvelope, decode};
pub use error::{ErrorKind, IngestError, PersistOutcome, StoreError};
pub use metric::{MetricSample, ProcessingOutcome};
pub use record::{DeadLetterRecord, EventRecord, RejectedMessage, StoredEvent};
pub use schema::{PayloadKind, SchemaDescriptor, SchemaRegistry};
pub use validate::{ValidationError, Validator};
