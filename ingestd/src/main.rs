//! The audit trail ingestion daemon.
//!
//! Wires the pipeline together: environment configuration, the Postgres
//! stores, the schema registry with the known topic set, the metrics
//! flusher and the Kafka consumer loop. Runs until SIGINT/SIGTERM, then
//! drains and exits.
//!
//! Exit codes: `0` normal shutdown, `1` configuration invalid, `2` store
//! unreachable at startup, `3` bus unreachable at startup.

use audit_trail_core::clock::{Clock, SystemClock};
use audit_trail_core::config::IngestConfig;
use audit_trail_core::schema::{PayloadKind, SchemaDescriptor, SchemaRegistry};
use audit_trail_core::store::CursorStore;
use audit_trail_core::validate::Validator;
use audit_trail_kafka::{ConsumerLoop, build_consumer, subscribe};
use audit_trail_pipeline::dispatcher::Dispatcher;
use audit_trail_pipeline::metrics::{MetricsAggregator, MetricsFlusher};
use audit_trail_pipeline::retry::RetryPolicy;
use audit_trail_postgres::{
    PostgresAuditLog, PostgresAuditStore, PostgresCursorStore, PostgresDeadLetterStore,
    PostgresMetricsStore, connect, migrate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const EXIT_CONFIG_INVALID: i32 = 1;
const EXIT_STORE_UNREACHABLE: i32 = 2;
const EXIT_BUS_UNREACHABLE: i32 = 3;

/// The topic set this deployment audits, declared at startup. Variant
/// dispatch downstream is by this table, never by payload sniffing.
fn known_topics() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        "orders.order.created",
        SchemaDescriptor::new("OrderCreated")
            .require("total", PayloadKind::Number)
            .require("currency", PayloadKind::String),
    );
    registry.register(
        "orders.order.updated",
        SchemaDescriptor::new("OrderUpdated").require("changes", PayloadKind::Object),
    );
    registry.register(
        "orders.order.cancelled",
        SchemaDescriptor::new("OrderCancelled").require("reason", PayloadKind::String),
    );
    registry.register(
        "payments.payment.authorized",
        SchemaDescriptor::new("PaymentAuthorized")
            .require("order_id", PayloadKind::String)
            .require("amount", PayloadKind::Number),
    );
    registry.register(
        "payments.payment.captured",
        SchemaDescriptor::new("PaymentCaptured")
            .require("order_id", PayloadKind::String)
            .require("amount", PayloadKind::Number),
    );
    registry.register(
        "inventory.stock.adjusted",
        SchemaDescriptor::new("StockAdjusted")
            .require("sku", PayloadKind::String)
            .require("delta", PayloadKind::Integer),
    );
    registry.register(
        "shipping.shipment.dispatched",
        SchemaDescriptor::new("ShipmentDispatched")
            .require("order_id", PayloadKind::String)
            .require("carrier", PayloadKind::String),
    );
    registry
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match IngestConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            return EXIT_CONFIG_INVALID;
        }
    };

    // Store first: without it there is nowhere to put anything.
    let pool = match connect(&config.store).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "audit store unreachable");
            return EXIT_STORE_UNREACHABLE;
        }
    };
    if let Err(e) = migrate(&pool).await {
        tracing::error!(error = %e, "schema migration failed");
        return EXIT_STORE_UNREACHABLE;
    }

    let registry = Arc::new(known_topics());

    let (consumer, rebalance_rx) = match build_consumer(&config.bus) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "event bus unreachable");
            return EXIT_BUS_UNREACHABLE;
        }
    };
    let topics = registry.topics();
    if let Err(e) = subscribe(&consumer, &topics) {
        tracing::error!(error = %e, "subscription failed");
        return EXIT_BUS_UNREACHABLE;
    }

    let cursor_co_located = config.pipeline.cursor_co_located;
    let events = Arc::new(PostgresAuditStore::new(pool.clone(), cursor_co_located));
    let dead_letters = Arc::new(PostgresDeadLetterStore::new(pool.clone()));
    let cursors: Option<Arc<dyn CursorStore>> = cursor_co_located
        .then(|| Arc::new(PostgresCursorStore::new(pool.clone())) as Arc<dyn CursorStore>);
    let metrics_store = Arc::new(PostgresMetricsStore::new(pool.clone()));
    let audit_log = Arc::new(PostgresAuditLog::new(pool));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let validator = Validator::new(Arc::clone(&clock)).with_skew(
        chrono::Duration::days(config.pipeline.timestamp_skew_past_days),
        chrono::Duration::seconds(config.pipeline.timestamp_skew_future_seconds),
    );
    let aggregator = Arc::new(MetricsAggregator::new(
        config.pipeline.metrics_queue_capacity,
    ));

    let mut dispatcher_builder = Dispatcher::builder()
        .registry(registry)
        .validator(validator)
        .event_store(events)
        .dead_letter_store(dead_letters)
        .metrics(Arc::clone(&aggregator))
        .retry_policy(RetryPolicy::from_config(&config.pipeline))
        .clock(clock);
    if let Some(cursors) = &cursors {
        dispatcher_builder = dispatcher_builder.cursor_store(Arc::clone(cursors));
    }
    let dispatcher = match dispatcher_builder.build() {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            tracing::error!(error = %e, "pipeline assembly failed");
            return EXIT_CONFIG_INVALID;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flusher = MetricsFlusher::new(
        Arc::clone(&aggregator),
        metrics_store,
        Duration::from_millis(config.pipeline.metrics_flush_interval_ms),
    );
    let flusher_handle = tokio::spawn(flusher.run(shutdown_rx.clone()));

    let mut loop_builder = ConsumerLoop::builder(Arc::new(consumer), rebalance_rx, dispatcher)
        .audit_log(audit_log)
        .worker_capacity(usize::try_from(config.bus.max_poll_records).unwrap_or(usize::MAX))
        .shutdown_grace(Duration::from_secs(config.pipeline.shutdown_grace_seconds));
    if let Some(cursors) = cursors {
        loop_builder = loop_builder.cursor_store(cursors);
    }
    let loop_handle = tokio::spawn(loop_builder.build().run(shutdown_rx));

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!("ingestion pipeline running");
    let _ = loop_handle.await;
    let _ = flusher_handle.await;
    tracing::info!("shutdown complete");
    0
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_table_covers_the_order_domains() {
        let registry = known_topics();
        assert!(registry.resolve("orders.order.created").is_some());
        assert!(registry.resolve("payments.payment.captured").is_some());
        assert!(registry.resolve("inventory.stock.adjusted").is_some());
        assert!(registry.resolve("shipping.shipment.dispatched").is_some());
        assert!(registry.resolve("billing.invoice.issued").is_none());
    }
}
