//! Bounded metrics aggregation and periodic flushing.
//!
//! Every dispatch reports one [`MetricSample`] into a guarded bounded
//! queue; a dedicated flusher drains it into the durable metrics store on
//! a fixed cadence, or early when the queue is half full. The queue is
//! the only cross-task channel on the hot path.
//!
//! Metrics are diagnostic, not authoritative: when the queue is full the
//! **oldest** samples are dropped, and a failed flush drops its batch
//! with a warning. Nothing here may ever block ingestion or couple metric
//! durability to event durability.

use audit_trail_core::metric::MetricSample;
use audit_trail_core::store::MetricsStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};

/// Samples drained per store round-trip.
const FLUSH_BATCH_SIZE: usize = 512;

/// Guarded bounded queue of pending metric samples.
pub struct MetricsAggregator {
    queue: Mutex<VecDeque<MetricSample>>,
    capacity: usize,
    dropped: AtomicU64,
    depth_signal: Notify,
}

impl MetricsAggregator {
    /// Create an aggregator holding at most `capacity` pending samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 (configuration validation rejects this
    /// earlier).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "metrics queue capacity must be at least 1");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            depth_signal: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MetricSample>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one sample. Never blocks: on overflow the oldest pending
    /// sample is dropped and counted.
    pub fn record(&self, sample: MetricSample) {
        let depth = {
            let mut queue = self.lock();
            queue.push_back(sample);
            if queue.len() > self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("audit_ingest_metric_samples_dropped_total").increment(1);
            }
            queue.len()
        };

        if depth >= self.capacity / 2 {
            self.depth_signal.notify_one();
        }
    }

    /// Drain up to `max` pending samples, oldest first.
    #[must_use]
    pub fn drain(&self, max: usize) -> Vec<MetricSample> {
        let mut queue = self.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Pending sample count.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    /// Samples dropped to overflow so far.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Resolves when the queue passes the early-flush threshold.
    pub async fn depth_exceeded(&self) {
        self.depth_signal.notified().await;
    }
}

/// Drains the aggregator into the durable metrics store.
pub struct MetricsFlusher {
    aggregator: std::sync::Arc<MetricsAggregator>,
    store: std::sync::Arc<dyn MetricsStore>,
    interval: Duration,
}

impl MetricsFlusher {
    /// Create a flusher with the given cadence.
    #[must_use]
    pub fn new(
        aggregator: std::sync::Arc<MetricsAggregator>,
        store: std::sync::Arc<dyn MetricsStore>,
        interval: Duration,
    ) -> Self {
        Self {
            aggregator,
            store,
            interval,
        }
    }

    /// Run until shutdown, then drain whatever is left.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                () = self.aggregator.depth_exceeded() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Final drain so a clean shutdown loses nothing that was queued.
        self.flush().await;
        tracing::debug!("metrics flusher stopped");
    }

    async fn flush(&self) {
        loop {
            let batch = self.aggregator.drain(FLUSH_BATCH_SIZE);
            if batch.is_empty() {
                return;
            }

            if let Err(e) = self.store.append_batch(&batch).await {
                // Best effort only: the batch is gone, ingestion is not.
                tracing::warn!(
                    error = %e,
                    dropped = batch.len(),
                    "metrics flush failed, dropping batch"
                );
                metrics::counter!("audit_ingest_metric_flush_failures_total").increment(1);
                return;
            }

            tracing::trace!(flushed = batch.len(), "metrics batch flushed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use audit_trail_core::metric::ProcessingOutcome;
    use chrono::Utc;

    fn sample(event_type: &str) -> MetricSample {
        MetricSample {
            event_type: event_type.to_string(),
            topic: "orders.order.created".to_string(),
            outcome: ProcessingOutcome::Success,
            duration: Duration::from_millis(5),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let aggregator = MetricsAggregator::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            aggregator.record(sample(name));
        }

        assert_eq!(aggregator.dropped_count(), 2);
        let drained = aggregator.drain(10);
        let names: Vec<&str> = drained.iter().map(|s| s.event_type.as_str()).collect();
        // "a" and "b" were the oldest and got dropped.
        assert_eq!(names, ["c", "d", "e"]);
    }

    #[test]
    fn drain_respects_max_and_order() {
        let aggregator = MetricsAggregator::new(10);
        for name in ["a", "b", "c"] {
            aggregator.record(sample(name));
        }

        let first = aggregator.drain(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].event_type, "a");
        assert_eq!(aggregator.depth(), 1);
    }
}
