//! The per-message dispatch state machine.
//!
//! A message moves through:
//!
//! ```text
//! Received → Routed → Deserialized → Validated → Persisted → Committed
//!          ↘ (any failure) → Retrying → (retries exhausted) → DeadLettered → Committed
//! ```
//!
//! `Committed` here means the partition cursor may advance past the
//! message's offset; both persisted and dead-lettered messages reach it.
//! The pipeline never halts a partition on an unfixable message; the only
//! way a dispatch refuses to let the cursor move is when the dead-letter
//! write itself fails, in which case the error propagates and the bus
//! re-delivers.
//!
//! Ordering is the caller's contract: the consumer loop serializes
//! dispatch calls within a partition and parallelizes across partitions.

use crate::metrics::MetricsAggregator;
use crate::retry::{RetryPolicy, retry_with_predicate};
use audit_trail_core::bus::RawMessage;
use audit_trail_core::clock::{Clock, SystemClock};
use audit_trail_core::envelope::decode;
use audit_trail_core::error::{ErrorKind, IngestError, PersistOutcome, StoreError};
use audit_trail_core::metric::{MetricSample, ProcessingOutcome};
use audit_trail_core::record::{EventRecord, RejectedMessage};
use audit_trail_core::schema::SchemaRegistry;
use audit_trail_core::store::{CursorStore, DeadLetterStore, EventStore};
use audit_trail_core::validate::Validator;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// How a dispatched message was accounted for.
///
/// Either way the partition cursor may now advance past its offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The message reached the store.
    Persisted {
        /// Whether this was a re-delivery absorbed by `event_id`
        /// idempotency (no new row).
        duplicate: bool,
    },
    /// The message was refused and captured durably.
    DeadLettered {
        /// Why it was refused.
        kind: ErrorKind,
    },
}

/// A required dispatcher dependency was not provided.
#[derive(Error, Debug)]
#[error("dispatcher is missing {0}")]
pub struct DispatcherBuildError(&'static str);

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    registry: Option<Arc<SchemaRegistry>>,
    validator: Option<Validator>,
    events: Option<Arc<dyn EventStore>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    cursors: Option<Arc<dyn CursorStore>>,
    metrics: Option<Arc<MetricsAggregator>>,
    retry: Option<RetryPolicy>,
    clock: Option<Arc<dyn Clock>>,
}

impl DispatcherBuilder {
    /// Set the topic → schema registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the envelope validator.
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the audit event store.
    #[must_use]
    pub fn event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the dead-letter store.
    #[must_use]
    pub fn dead_letter_store(mut self, dead_letters: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Enable co-located cursor mode: dead-lettered messages advance the
    /// given cursor store (persisted ones are advanced inside the event
    /// store's transaction).
    #[must_use]
    pub fn cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Set the metrics aggregator.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the persist retry policy.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Override the clock (tests).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`DispatcherBuildError`] if the registry, validator, event
    /// store, dead-letter store or metrics aggregator is missing.
    pub fn build(self) -> Result<Dispatcher, DispatcherBuildError> {
        Ok(Dispatcher {
            registry: self.registry.ok_or(DispatcherBuildError("a schema registry"))?,
            validator: self.validator.ok_or(DispatcherBuildError("a validator"))?,
            events: self.events.ok_or(DispatcherBuildError("an event store"))?,
            dead_letters: self
                .dead_letters
                .ok_or(DispatcherBuildError("a dead-letter store"))?,
            cursors: self.cursors,
            metrics: self
                .metrics
                .ok_or(DispatcherBuildError("a metrics aggregator"))?,
            retry: self.retry.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

/// Routes one message through route → decode → validate → persist, with
/// bounded retry on transient store failures and dead-lettering for
/// everything the pipeline refuses.
pub struct Dispatcher {
    registry: Arc<SchemaRegistry>,
    validator: Validator,
    events: Arc<dyn EventStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    cursors: Option<Arc<dyn CursorStore>>,
    metrics: Arc<MetricsAggregator>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Process one message to a disposition.
    ///
    /// # Errors
    ///
    /// Returns an error only when the message could not be accounted for
    /// at all (the dead-letter write or the co-located cursor advance
    /// failed). The caller must not advance the partition past the
    /// message; the bus will re-deliver it.
    pub async fn dispatch(&self, message: &RawMessage) -> Result<Disposition, StoreError> {
        self.run(message, true).await
    }

    /// Replay variant: same stages, but rejections are *not* written to
    /// the dead-letter store again (the original row is already the
    /// durable record) and no processing metric is emitted.
    pub(crate) async fn dispatch_replay(
        &self,
        message: &RawMessage,
    ) -> Result<Disposition, StoreError> {
        self.run(message, false).await
    }

    async fn run(&self, message: &RawMessage, hot_path: bool) -> Result<Disposition, StoreError> {
        let started = Instant::now();
        let coords = &message.coords;

        // Route.
        let Some(descriptor) = self.registry.resolve(&coords.topic) else {
            tracing::warn!(coords = %coords, "message on unregistered topic");
            let refusal = IngestError::UnknownTopic {
                topic: coords.topic.clone(),
            };
            return self
                .reject(
                    message,
                    None,
                    refusal.kind(),
                    refusal.to_string(),
                    "unknown",
                    hot_path,
                    started,
                )
                .await;
        };
        let event_type = descriptor.event_type.clone();

        // Deserialize.
        let wire = match decode(&message.payload) {
            Ok(wire) => wire,
            Err(e) => {
                let refusal = IngestError::from(e);
                return self
                    .reject(
                        message,
                        Some(event_type.clone()),
                        refusal.kind(),
                        refusal.to_string(),
                        &event_type,
                        hot_path,
                        started,
                    )
                    .await;
            }
        };

        // Validate.
        let envelope = match self.validator.validate(wire, descriptor) {
            Ok(envelope) => envelope,
            Err(e) => {
                let refusal = IngestError::from(e);
                return self
                    .reject(
                        message,
                        Some(event_type.clone()),
                        refusal.kind(),
                        refusal.to_string(),
                        &event_type,
                        hot_path,
                        started,
                    )
                    .await;
            }
        };

        // Persist, retrying transient store failures with backoff.
        let event_id = envelope.event_id;
        let record = EventRecord::from_envelope(envelope, coords.clone());
        let persisted = retry_with_predicate(
            &self.retry,
            || self.events.persist(&record),
            StoreError::is_transient,
        )
        .await;

        match persisted {
            Ok(PersistOutcome::Committed) => {
                tracing::debug!(coords = %coords, event_id = %event_id, "event persisted");
                metrics::counter!("audit_ingest_events_persisted_total", "event_type" => event_type.clone())
                    .increment(1);
                if hot_path {
                    self.sample(&event_type, coords, ProcessingOutcome::Success, started);
                }
                Ok(Disposition::Persisted { duplicate: false })
            }
            Ok(PersistOutcome::Duplicate) => {
                tracing::debug!(coords = %coords, event_id = %event_id, "duplicate delivery absorbed");
                metrics::counter!("audit_ingest_duplicates_total").increment(1);
                if hot_path {
                    self.sample(&event_type, coords, ProcessingOutcome::Success, started);
                }
                Ok(Disposition::Persisted { duplicate: true })
            }
            Ok(PersistOutcome::VersionConflict) => {
                metrics::counter!("audit_ingest_version_conflicts_total").increment(1);
                self.reject(
                    message,
                    Some(event_type.clone()),
                    ErrorKind::VersionConflict,
                    format!(
                        "aggregate ({}, {}) version {} already written by a different event id (got {})",
                        record.aggregate_type, record.aggregate_id, record.version, event_id
                    ),
                    &event_type,
                    hot_path,
                    started,
                )
                .await
            }
            Err(e) => {
                // Retries exhausted, or a fatal store error.
                self.reject(
                    message,
                    Some(event_type.clone()),
                    ErrorKind::StoreFailed,
                    e.to_string(),
                    &event_type,
                    hot_path,
                    started,
                )
                .await
            }
        }
    }

    /// Capture a refused message and let the partition move on.
    ///
    /// In co-located cursor mode the cursor row advances here, since the
    /// event-store transaction never ran (or rolled back). A failure in
    /// either write propagates so the caller re-fetches the message.
    #[allow(clippy::too_many_arguments)]
    async fn reject(
        &self,
        message: &RawMessage,
        schema_attempted: Option<String>,
        kind: ErrorKind,
        detail: String,
        event_type_label: &str,
        hot_path: bool,
        started: Instant,
    ) -> Result<Disposition, StoreError> {
        if hot_path {
            let rejected = RejectedMessage {
                coords: message.coords.clone(),
                key: message.key.clone(),
                headers: message.headers.clone(),
                payload: message.payload.clone(),
                schema_attempted,
                kind,
                detail: detail.clone(),
                first_seen: self.clock.now(),
            };
            let dlq_id = self.dead_letters.record_failure(&rejected).await?;

            if let Some(cursors) = &self.cursors {
                cursors
                    .advance(
                        &message.coords.topic,
                        message.coords.partition,
                        message.coords.next_offset(),
                    )
                    .await?;
            }

            tracing::warn!(
                coords = %message.coords,
                kind = %kind,
                dlq_id,
                detail = %detail,
                "message dead-lettered"
            );
            metrics::counter!("audit_ingest_dead_letters_total", "kind" => kind.as_str())
                .increment(1);
            self.sample(
                event_type_label,
                &message.coords,
                kind.processing_outcome(),
                started,
            );
        }

        Ok(Disposition::DeadLettered { kind })
    }

    fn sample(
        &self,
        event_type: &str,
        coords: &audit_trail_core::bus::BusCoordinates,
        outcome: ProcessingOutcome,
        started: Instant,
    ) {
        let duration = started.elapsed();
        self.metrics.record(MetricSample {
            event_type: event_type.to_string(),
            topic: coords.topic.clone(),
            outcome,
            duration,
            recorded_at: self.clock.now(),
        });
        metrics::histogram!("audit_ingest_dispatch_duration_seconds")
            .record(duration.as_secs_f64());
    }
}
