//! End-to-end dispatcher behaviour over the in-memory stores.
//!
//! Covers the happy path, duplicate absorption, version conflicts,
//! validation failures, transient store outages, dead-letter failure
//! semantics and operator replay: everything short of a real broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use audit_trail_core::clock::Clock;
use audit_trail_core::error::ErrorKind;
use audit_trail_core::metric::ProcessingOutcome;
use audit_trail_core::schema::{PayloadKind, SchemaDescriptor, SchemaRegistry};
use audit_trail_core::validate::Validator;
use audit_trail_pipeline::dispatcher::{Dispatcher, Disposition};
use audit_trail_pipeline::metrics::MetricsAggregator;
use audit_trail_pipeline::replay::{DlqReplayer, ReplayOutcome};
use audit_trail_pipeline::retry::RetryPolicy;
use audit_trail_testing::fixtures::EnvelopeBuilder;
use audit_trail_testing::mocks::FixedClock;
use audit_trail_testing::stores::{
    InMemoryAuditStore, InMemoryCursorStore, InMemoryDeadLetterStore,
};
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "orders.order.created";

struct Harness {
    events: Arc<InMemoryAuditStore>,
    dead_letters: Arc<InMemoryDeadLetterStore>,
    cursors: Arc<InMemoryCursorStore>,
    metrics: Arc<MetricsAggregator>,
    dispatcher: Arc<Dispatcher>,
}

fn harness() -> Harness {
    harness_with_retry(
        RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(1))
            .build(),
    )
}

fn harness_with_retry(retry: RetryPolicy) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at("2024-01-01T12:00:00Z"));

    let mut registry = SchemaRegistry::new();
    registry.register(
        TOPIC,
        SchemaDescriptor::new("OrderCreated")
            .require("total", PayloadKind::Number)
            .require("currency", PayloadKind::String),
    );

    let cursors = Arc::new(InMemoryCursorStore::new());
    let events = Arc::new(InMemoryAuditStore::with_co_located_cursors(Arc::clone(
        &cursors,
    )));
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let metrics = Arc::new(MetricsAggregator::new(1024));

    let dispatcher = Arc::new(
        Dispatcher::builder()
            .registry(Arc::new(registry))
            .validator(Validator::new(Arc::clone(&clock)))
            .event_store(Arc::clone(&events) as _)
            .dead_letter_store(Arc::clone(&dead_letters) as _)
            .cursor_store(Arc::clone(&cursors) as _)
            .metrics(Arc::clone(&metrics))
            .retry_policy(retry)
            .clock(clock)
            .build()
            .expect("complete dispatcher"),
    );

    Harness {
        events,
        dead_letters,
        cursors,
        metrics,
        dispatcher,
    }
}

#[tokio::test]
async fn happy_path_persists_and_advances_cursor() {
    let h = harness();
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);

    let disposition = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(disposition, Disposition::Persisted { duplicate: false });
    let events = h.events.events();
    assert_eq!(events.len(), 1);
    let record = &events[0].record;
    assert_eq!(
        record.event_id.to_string(),
        "11111111-1111-1111-1111-111111111111"
    );
    assert_eq!(record.aggregate_id, "ORD-1");
    assert_eq!(record.aggregate_type, "Order");
    assert_eq!(record.version, 1);
    assert_eq!(record.coords.topic, TOPIC);
    assert_eq!(record.coords.offset, 42);
    assert!(!record.event_data.is_empty());

    assert_eq!(h.cursors.get(TOPIC, 0), Some(43));
    assert!(h.dead_letters.is_empty());

    let samples = h.metrics.drain(10);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].outcome, ProcessingOutcome::Success);
    assert_eq!(samples[0].event_type, "OrderCreated");
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed() {
    let h = harness();
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);

    let first = h.dispatcher.dispatch(&message).await.unwrap();
    let second = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(first, Disposition::Persisted { duplicate: false });
    assert_eq!(second, Disposition::Persisted { duplicate: true });
    assert_eq!(h.events.len(), 1);
    assert_eq!(h.events.duplicate_count(), 1);
    assert_eq!(h.cursors.get(TOPIC, 0), Some(43));
    assert!(h.dead_letters.is_empty());

    let samples = h.metrics.drain(10);
    assert_eq!(samples.len(), 2);
    assert!(samples
        .iter()
        .all(|s| s.outcome == ProcessingOutcome::Success));
}

#[tokio::test]
async fn well_behaved_producer_yields_dense_versions() {
    let h = harness();
    for (version, event_id, offset) in [
        (1, "00000000-0000-0000-0000-000000000001", 10),
        (2, "00000000-0000-0000-0000-000000000002", 11),
        (3, "00000000-0000-0000-0000-000000000003", 12),
    ] {
        let message = EnvelopeBuilder::order_created()
            .event_id(event_id)
            .version(version)
            .into_message(TOPIC, 0, offset);
        assert_eq!(
            h.dispatcher.dispatch(&message).await.unwrap(),
            Disposition::Persisted { duplicate: false }
        );
    }

    assert_eq!(h.events.versions_of("Order", "ORD-1"), vec![1, 2, 3]);
    assert_eq!(h.cursors.get(TOPIC, 0), Some(13));
}

#[tokio::test]
async fn version_conflict_goes_to_dead_letters_and_advances() {
    let h = harness();
    let first = EnvelopeBuilder::order_created()
        .event_id("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa")
        .into_message(TOPIC, 0, 10);
    let second = EnvelopeBuilder::order_created()
        .event_id("bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb")
        .into_message(TOPIC, 0, 11);

    assert_eq!(
        h.dispatcher.dispatch(&first).await.unwrap(),
        Disposition::Persisted { duplicate: false }
    );
    assert_eq!(
        h.dispatcher.dispatch(&second).await.unwrap(),
        Disposition::DeadLettered {
            kind: ErrorKind::VersionConflict
        }
    );

    assert_eq!(h.events.len(), 1);
    let dead = h.dead_letters.records();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].rejected.kind, ErrorKind::VersionConflict);
    assert_eq!(dead[0].rejected.coords.offset, 11);
    // Both offsets accounted for.
    assert_eq!(h.cursors.get(TOPIC, 0), Some(12));
}

#[tokio::test]
async fn missing_event_id_is_dead_lettered_with_field() {
    let h = harness();
    let message = EnvelopeBuilder::order_created()
        .without_event_id()
        .into_message(TOPIC, 0, 7);

    let disposition = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            kind: ErrorKind::Validation
        }
    );
    assert!(h.events.is_empty());
    let dead = h.dead_letters.records();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].rejected.detail.contains("event_id"));
    assert_eq!(dead[0].rejected.payload, message.payload);
    assert_eq!(h.cursors.get(TOPIC, 0), Some(8));

    let samples = h.metrics.drain(10);
    assert_eq!(samples[0].outcome, ProcessingOutcome::ValidationFailed);
}

#[tokio::test]
async fn transient_outage_is_retried_through() {
    let h = harness_with_retry(
        RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(5))
            .build(),
    );
    h.events.fail_times(3);
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);

    let disposition = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(disposition, Disposition::Persisted { duplicate: false });
    assert_eq!(h.events.len(), 1);
    assert!(h.dead_letters.is_empty());
    assert_eq!(h.cursors.get(TOPIC, 0), Some(43));

    // Backoff shows up in the measured processing time (5 + 10 + 20 ms).
    let samples = h.metrics.drain(10);
    assert_eq!(samples[0].outcome, ProcessingOutcome::Success);
    assert!(samples[0].duration >= Duration::from_millis(30));
}

#[tokio::test]
async fn unknown_topic_is_dead_lettered_and_advances() {
    let h = harness();
    let message =
        EnvelopeBuilder::order_created().into_message("billing.invoice.issued", 2, 5);

    let disposition = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            kind: ErrorKind::UnknownTopic
        }
    );
    let dead = h.dead_letters.records();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].rejected.schema_attempted.is_none());
    assert_eq!(h.cursors.get("billing.invoice.issued", 2), Some(6));

    let samples = h.metrics.drain(10);
    assert_eq!(samples[0].outcome, ProcessingOutcome::Unknown);
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_message() {
    let h = harness_with_retry(
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build(),
    );
    h.events.fail_times(10);
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);

    let disposition = h.dispatcher.dispatch(&message).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            kind: ErrorKind::StoreFailed
        }
    );
    assert!(h.events.is_empty());
    assert_eq!(h.dead_letters.len(), 1);
    assert_eq!(h.cursors.get(TOPIC, 0), Some(43));

    let samples = h.metrics.drain(10);
    assert_eq!(samples[0].outcome, ProcessingOutcome::PersistFailed);
}

#[tokio::test]
async fn failed_dead_letter_write_refuses_to_advance() {
    let h = harness();
    h.dead_letters.fail_times(1);
    let message = EnvelopeBuilder::order_created()
        .without_event_id()
        .into_message(TOPIC, 0, 7);

    // First attempt: the DLQ insert fails, nothing may advance.
    let result = h.dispatcher.dispatch(&message).await;
    assert!(result.is_err());
    assert!(h.dead_letters.is_empty());
    assert_eq!(h.cursors.get(TOPIC, 0), None);

    // Re-delivery succeeds once the DLQ is back.
    let disposition = h.dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            kind: ErrorKind::Validation
        }
    );
    assert_eq!(h.cursors.get(TOPIC, 0), Some(8));
}

#[tokio::test]
async fn replay_after_transient_origin_persists() {
    let h = harness_with_retry(
        RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build(),
    );
    // Outage outlasts the retry allowance: the message is dead-lettered.
    h.events.fail_times(2);
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);
    h.dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(h.dead_letters.len(), 1);
    assert!(h.events.is_empty());

    // Store recovered; the operator replays.
    let replayer = DlqReplayer::new(
        Arc::clone(&h.dead_letters) as _,
        Arc::clone(&h.dispatcher),
    );
    let outcome = replayer.replay(1, false).await.unwrap();

    assert_eq!(outcome, ReplayOutcome::Persisted);
    assert_eq!(h.events.len(), 1);
    // The original entry is updated, never duplicated or deleted.
    let dead = h.dead_letters.records();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, 1);
    assert_eq!(dead[0].last_retry_outcome.as_deref(), Some("persisted"));
}

#[tokio::test]
async fn replay_of_deterministic_failure_reclassifies_without_new_row() {
    let h = harness();
    let message = EnvelopeBuilder::order_created()
        .without_event_id()
        .into_message(TOPIC, 0, 7);
    h.dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(h.dead_letters.len(), 1);

    let replayer = DlqReplayer::new(
        Arc::clone(&h.dead_letters) as _,
        Arc::clone(&h.dispatcher),
    );
    let outcome = replayer.replay(1, false).await.unwrap();

    assert_eq!(outcome, ReplayOutcome::RejectedAgain(ErrorKind::Validation));
    let dead = h.dead_letters.records();
    assert_eq!(dead.len(), 1, "replay must not add a second dead letter");
    assert_eq!(
        dead[0].last_retry_outcome.as_deref(),
        Some("rejected:validation_error")
    );
    assert!(h.events.is_empty());
}

#[tokio::test]
async fn forced_replay_surfaces_already_persisted() {
    let h = harness_with_retry(
        RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build(),
    );
    // Dead-letter the message, then persist it via normal re-delivery.
    h.events.fail_times(2);
    let message = EnvelopeBuilder::order_created().into_message(TOPIC, 0, 42);
    h.dispatcher.dispatch(&message).await.unwrap();
    h.dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(h.events.len(), 1);

    let replayer = DlqReplayer::new(
        Arc::clone(&h.dead_letters) as _,
        Arc::clone(&h.dispatcher),
    );

    // Plain replay reports success; forced replay names the no-op.
    assert_eq!(replayer.replay(1, false).await.unwrap(), ReplayOutcome::Persisted);
    assert_eq!(
        replayer.replay(1, true).await.unwrap(),
        ReplayOutcome::AlreadyPersisted
    );
    assert_eq!(h.events.len(), 1);
    assert_eq!(h.dead_letters.records()[0].retry_count, 2);
}

#[tokio::test]
async fn replay_of_unknown_id_fails() {
    let h = harness();
    let replayer = DlqReplayer::new(
        Arc::clone(&h.dead_letters) as _,
        Arc::clone(&h.dispatcher),
    );
    assert!(replayer.replay(999, false).await.is_err());
}
