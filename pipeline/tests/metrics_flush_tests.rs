//! Metrics flusher behaviour: cadence flushing, shutdown draining, and
//! the never-block / drop-on-failure contract.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use audit_trail_core::metric::{MetricSample, ProcessingOutcome};
use audit_trail_pipeline::metrics::{MetricsAggregator, MetricsFlusher};
use audit_trail_testing::stores::InMemoryMetricsStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn sample(event_type: &str) -> MetricSample {
    MetricSample {
        event_type: event_type.to_string(),
        topic: "orders.order.created".to_string(),
        outcome: ProcessingOutcome::Success,
        duration: Duration::from_millis(3),
        recorded_at: Utc::now(),
    }
}

#[tokio::test]
async fn flushes_on_cadence() {
    let aggregator = Arc::new(MetricsAggregator::new(1024));
    let store = Arc::new(InMemoryMetricsStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flusher = MetricsFlusher::new(
        Arc::clone(&aggregator),
        Arc::clone(&store) as _,
        Duration::from_millis(10),
    );
    let handle = tokio::spawn(flusher.run(shutdown_rx));

    aggregator.record(sample("OrderCreated"));
    aggregator.record(sample("OrderCreated"));
    aggregator.record(sample("PaymentCaptured"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.len(), 3);
    assert_eq!(aggregator.depth(), 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_pending_samples() {
    let aggregator = Arc::new(MetricsAggregator::new(1024));
    let store = Arc::new(InMemoryMetricsStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // A cadence far longer than the test: only the shutdown drain runs.
    let flusher = MetricsFlusher::new(
        Arc::clone(&aggregator),
        Arc::clone(&store) as _,
        Duration::from_secs(3600),
    );
    let handle = tokio::spawn(flusher.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(10)).await;

    aggregator.record(sample("OrderCreated"));
    aggregator.record(sample("OrderCancelled"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn failed_flush_drops_the_batch_and_moves_on() {
    let aggregator = Arc::new(MetricsAggregator::new(1024));
    let store = Arc::new(InMemoryMetricsStore::new());
    store.fail_times(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flusher = MetricsFlusher::new(
        Arc::clone(&aggregator),
        Arc::clone(&store) as _,
        Duration::from_millis(10),
    );
    let handle = tokio::spawn(flusher.run(shutdown_rx));

    aggregator.record(sample("OrderCreated"));
    tokio::time::sleep(Duration::from_millis(40)).await;

    // First flush hit the injected failure; the sample is gone for good.
    assert_eq!(store.len(), 0);
    assert_eq!(aggregator.depth(), 0);

    // Later samples flush normally.
    aggregator.record(sample("PaymentCaptured"));
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(store.len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
