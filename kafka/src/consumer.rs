//! Consumer construction and the partition-worker loop.

use crate::context::{IngestContext, RebalanceEvent};
use crate::progress::{CommitMark, PartitionProgress, PendingCommit};
use audit_trail_core::bus::{BusCoordinates, RawMessage};
use audit_trail_core::config::BusConfig;
use audit_trail_core::store::{AuditLogStore, CursorStore};
use audit_trail_pipeline::dispatcher::Dispatcher;
use rdkafka::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pause after a bus-level receive error before polling again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pause before re-dispatching a message whose dead-letter write failed.
const UNACCOUNTED_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Consumer construction/subscription failure. Startup treats any of
/// these as "bus unreachable".
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The client could not be created from the configuration.
    #[error("failed to create consumer: {0}")]
    Create(String),

    /// The subscription was rejected.
    #[error("failed to subscribe to topics: {0}")]
    Subscribe(String),
}

/// Build a stream consumer wired to an [`IngestContext`].
///
/// Auto-commit is always off; offsets move only through the loop's
/// explicit commits. Returns the consumer together with the rebalance
/// event channel the context feeds.
///
/// Note that `max_poll_records` from the bus configuration is not a
/// broker option: it bounds the loop-side per-partition buffer instead
/// (see [`ConsumerLoopBuilder::worker_capacity`]).
///
/// # Errors
///
/// Returns [`ConsumerError::Create`] for invalid configuration.
pub fn build_consumer(
    config: &BusConfig,
) -> Result<
    (
        StreamConsumer<IngestContext>,
        mpsc::UnboundedReceiver<RebalanceEvent>,
    ),
    ConsumerError,
> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let consumer: StreamConsumer<IngestContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.consumer_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", config.auto_offset_reset.as_str())
        .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
        .set("fetch.max.bytes", config.fetch_max_bytes.to_string())
        .set("session.timeout.ms", "6000")
        .set("enable.partition.eof", "false")
        .create_with_context(IngestContext::new(events_tx))
        .map_err(|e| ConsumerError::Create(e.to_string()))?;

    tracing::info!(
        brokers = %config.bootstrap_servers,
        group = %config.consumer_group_id,
        auto_offset_reset = %config.auto_offset_reset,
        manual_commit = true,
        "consumer created"
    );

    Ok((consumer, events_rx))
}

/// Subscribe the consumer to the registered topic set.
///
/// # Errors
///
/// Returns [`ConsumerError::Subscribe`] if the subscription is rejected.
pub fn subscribe(
    consumer: &StreamConsumer<IngestContext>,
    topics: &[&str],
) -> Result<(), ConsumerError> {
    consumer
        .subscribe(topics)
        .map_err(|e| ConsumerError::Subscribe(e.to_string()))?;
    tracing::info!(?topics, "subscribed");
    Ok(())
}

struct Worker {
    tx: mpsc::Sender<RawMessage>,
    handle: JoinHandle<()>,
}

/// Builder for [`ConsumerLoop`].
pub struct ConsumerLoopBuilder {
    consumer: Arc<StreamConsumer<IngestContext>>,
    rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
    dispatcher: Arc<Dispatcher>,
    cursors: Option<Arc<dyn CursorStore>>,
    audit_log: Option<Arc<dyn AuditLogStore>>,
    commit_interval: Duration,
    worker_capacity: usize,
    shutdown_grace: Duration,
}

impl ConsumerLoopBuilder {
    /// Attach the cursor store for co-located mode: newly assigned
    /// partitions are seeked to the durable cursor.
    #[must_use]
    pub fn cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Attach the audit log for system-actor batch-commit entries.
    #[must_use]
    pub fn audit_log(mut self, audit_log: Arc<dyn AuditLogStore>) -> Self {
        self.audit_log = Some(audit_log);
        self
    }

    /// Override the commit flush cadence (default 1 s).
    #[must_use]
    pub const fn commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Override the per-partition in-flight bound (default 64). This is
    /// the loop-side batch shape: a partition's worker can lag the
    /// consumer by at most this many messages before the loop stops
    /// feeding it.
    #[must_use]
    pub const fn worker_capacity(mut self, capacity: usize) -> Self {
        self.worker_capacity = capacity;
        self
    }

    /// Override the hard shutdown deadline (default 30 s).
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Build the loop.
    #[must_use]
    pub fn build(self) -> ConsumerLoop {
        ConsumerLoop {
            consumer: self.consumer,
            rebalance_rx: self.rebalance_rx,
            dispatcher: self.dispatcher,
            cursors: self.cursors,
            audit_log: self.audit_log,
            commit_interval: self.commit_interval,
            worker_capacity: self.worker_capacity,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

/// The consumer loop: pulls messages, fans them out to one in-order
/// worker per partition, folds completion marks into commit bookkeeping,
/// and handles rebalances and shutdown.
pub struct ConsumerLoop {
    consumer: Arc<StreamConsumer<IngestContext>>,
    rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
    dispatcher: Arc<Dispatcher>,
    cursors: Option<Arc<dyn CursorStore>>,
    audit_log: Option<Arc<dyn AuditLogStore>>,
    commit_interval: Duration,
    worker_capacity: usize,
    shutdown_grace: Duration,
}

impl ConsumerLoop {
    /// Start building a loop from its required parts.
    #[must_use]
    pub fn builder(
        consumer: Arc<StreamConsumer<IngestContext>>,
        rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
        dispatcher: Arc<Dispatcher>,
    ) -> ConsumerLoopBuilder {
        ConsumerLoopBuilder {
            consumer,
            rebalance_rx,
            dispatcher,
            cursors: None,
            audit_log: None,
            commit_interval: Duration::from_secs(1),
            worker_capacity: 64,
            shutdown_grace: Duration::from_secs(30),
        }
    }

    /// Run until the shutdown signal flips.
    ///
    /// On shutdown: stop pulling, let each worker finish its in-flight
    /// message and drain its buffer within the grace deadline, commit the
    /// final marks, release. Messages that did not make it are
    /// re-delivered after restart and absorbed by `event_id` dedup.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            consumer,
            mut rebalance_rx,
            dispatcher,
            cursors,
            audit_log,
            commit_interval,
            worker_capacity,
            shutdown_grace,
        } = self;

        let mut workers: HashMap<(String, i32), Worker> = HashMap::new();
        let (marks_tx, mut marks_rx) = mpsc::unbounded_channel::<CommitMark>();
        let mut progress = PartitionProgress::new();
        let mut commit_ticker = tokio::time::interval(commit_interval);
        commit_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = consumer.recv() => match received {
                    Ok(message) => {
                        let raw = detach(&message);
                        let key = (raw.coords.topic.clone(), raw.coords.partition);
                        let worker = workers.entry(key).or_insert_with(|| {
                            spawn_worker(
                                Arc::clone(&dispatcher),
                                marks_tx.clone(),
                                shutdown.clone(),
                                worker_capacity,
                            )
                        });
                        // Bounded send: a lagging partition back-pressures
                        // the consumer without touching other partitions.
                        if worker.tx.send(raw).await.is_err() {
                            tracing::warn!(
                                "partition worker stopped; message will be re-delivered"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bus receive error, backing off");
                        metrics::counter!("audit_ingest_bus_errors_total").increment(1);
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                },

                Some(mark) = marks_rx.recv() => {
                    progress.observe(mark);
                }

                _ = commit_ticker.tick() => {
                    commit_all(&consumer, audit_log.as_deref(), &mut progress, CommitMode::Async)
                        .await;
                }

                Some(event) = rebalance_rx.recv() => match event {
                    RebalanceEvent::Assigned(partitions) => {
                        seek_assigned(&consumer, cursors.as_deref(), &partitions).await;
                    }
                    RebalanceEvent::Revoked(partitions) => {
                        release_partitions(
                            &consumer,
                            audit_log.as_deref(),
                            &partitions,
                            &mut workers,
                            &mut marks_rx,
                            &mut progress,
                            shutdown_grace,
                        )
                        .await;
                    }
                },

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("shutdown requested, draining partition workers");
        drop(marks_tx);
        let deadline = tokio::time::Instant::now() + shutdown_grace;
        for ((topic, partition), worker) in workers.drain() {
            let Worker { tx, mut handle } = worker;
            drop(tx);
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                tracing::warn!(
                    topic = %topic,
                    partition,
                    "worker exceeded shutdown grace, abandoning in-flight work"
                );
            }
        }
        while let Some(mark) = marks_rx.recv().await {
            progress.observe(mark);
        }
        commit_all(&consumer, audit_log.as_deref(), &mut progress, CommitMode::Sync).await;
        tracing::info!("consumer loop stopped");
    }
}

/// Commit everything pending, one partition at a time.
async fn commit_all(
    consumer: &StreamConsumer<IngestContext>,
    audit_log: Option<&dyn AuditLogStore>,
    progress: &mut PartitionProgress,
    mode: CommitMode,
) {
    for ((topic, partition), pending) in progress.take_all() {
        commit_one(consumer, audit_log, &topic, partition, pending, mode).await;
    }
}

async fn commit_one(
    consumer: &StreamConsumer<IngestContext>,
    audit_log: Option<&dyn AuditLogStore>,
    topic: &str,
    partition: i32,
    pending: PendingCommit,
    mode: CommitMode,
) {
    let mut tpl = TopicPartitionList::new();
    if let Err(e) = tpl.add_partition_offset(topic, partition, Offset::Offset(pending.next_offset))
    {
        tracing::error!(topic, partition, error = %e, "invalid commit offset");
        return;
    }

    match consumer.commit(&tpl, mode) {
        Ok(()) => {
            tracing::debug!(
                topic,
                partition,
                next_offset = pending.next_offset,
                messages = pending.message_count,
                "offsets committed"
            );
            metrics::counter!("audit_ingest_commits_total").increment(1);

            if let Some(audit_log) = audit_log {
                if let Err(e) = audit_log
                    .record_batch_commit(
                        topic,
                        partition,
                        pending.next_offset - 1,
                        pending.message_count,
                    )
                    .await
                {
                    tracing::warn!(error = %e, "failed to write batch-commit audit entry");
                }
            }
        }
        Err(e) => {
            // The store already holds the messages; a lost commit only
            // means re-delivery, which dedup absorbs.
            tracing::warn!(topic, partition, error = %e, "offset commit failed");
        }
    }
}

/// Co-located mode: continue newly assigned partitions from the durable
/// cursor rather than the bus-held offset.
async fn seek_assigned(
    consumer: &StreamConsumer<IngestContext>,
    cursors: Option<&dyn CursorStore>,
    partitions: &[(String, i32)],
) {
    let Some(cursors) = cursors else {
        return;
    };

    for (topic, partition) in partitions {
        match cursors.load(topic, *partition).await {
            Ok(Some(next_offset)) => {
                match consumer.seek(
                    topic,
                    *partition,
                    Offset::Offset(next_offset),
                    Duration::from_secs(5),
                ) {
                    Ok(()) => {
                        tracing::info!(topic, partition, next_offset, "seeked to durable cursor");
                    }
                    Err(e) => {
                        // Messages fetched from the bus offset instead are
                        // deduplicated downstream.
                        tracing::warn!(topic, partition, error = %e, "seek failed");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(topic, partition, error = %e, "cursor load failed");
            }
        }
    }
}

/// Revoke path: stop feeding the partitions, drain their workers, commit
/// their final marks synchronously, then let the rebalance proceed.
async fn release_partitions(
    consumer: &StreamConsumer<IngestContext>,
    audit_log: Option<&dyn AuditLogStore>,
    partitions: &[(String, i32)],
    workers: &mut HashMap<(String, i32), Worker>,
    marks_rx: &mut mpsc::UnboundedReceiver<CommitMark>,
    progress: &mut PartitionProgress,
    grace: Duration,
) {
    for key in partitions {
        if let Some(worker) = workers.remove(key) {
            let Worker { tx, mut handle } = worker;
            drop(tx);
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                tracing::warn!(
                    topic = %key.0,
                    partition = key.1,
                    "worker did not drain before revoke deadline"
                );
            }
        }
    }

    while let Ok(mark) = marks_rx.try_recv() {
        progress.observe(mark);
    }

    for (topic, partition) in partitions {
        if let Some(pending) = progress.take_partition(topic, *partition) {
            commit_one(
                consumer,
                audit_log,
                topic,
                *partition,
                pending,
                CommitMode::Sync,
            )
            .await;
        }
    }
}

/// Copy a borrowed delivery into the transport-neutral message type.
fn detach(message: &BorrowedMessage<'_>) -> RawMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    RawMessage {
        coords: BusCoordinates::new(message.topic(), message.partition(), message.offset()),
        key: message.key().map(<[u8]>::to_vec),
        headers,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// One strictly-sequential worker per assigned partition.
///
/// A message leaves the worker only once it is accounted for; when even
/// the dead-letter write fails, the worker re-dispatches the same message
/// after a pause rather than advance past it.
fn spawn_worker(
    dispatcher: Arc<Dispatcher>,
    marks: mpsc::UnboundedSender<CommitMark>,
    mut shutdown: watch::Receiver<bool>,
    capacity: usize,
) -> Worker {
    let (tx, mut rx) = mpsc::channel::<RawMessage>(capacity);

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            loop {
                match dispatcher.dispatch(&message).await {
                    Ok(_) => {
                        let _ = marks.send(CommitMark {
                            topic: message.coords.topic.clone(),
                            partition: message.coords.partition,
                            next_offset: message.coords.next_offset(),
                        });
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            coords = %message.coords,
                            error = %e,
                            "message not yet accounted for, holding partition"
                        );
                        tokio::select! {
                            () = tokio::time::sleep(UNACCOUNTED_RETRY_PAUSE) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    Worker { tx, handle }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_consumer_with_defaults() {
        // Creation does not contact the brokers; only configuration
        // validity is exercised here.
        let (consumer, _events) =
            build_consumer(&BusConfig::default()).expect("default config must be valid");
        drop(consumer);
    }

    #[test]
    fn consumer_loop_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ConsumerLoop>();
    }
}
