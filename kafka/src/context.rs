//! Consumer context: rebalance callbacks forwarded to the loop.

use rdkafka::client::ClientContext;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::topic_partition_list::TopicPartitionList;
use tokio::sync::mpsc::UnboundedSender;

/// A partition assignment change observed by the group protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions newly assigned to this consumer.
    Assigned(Vec<(String, i32)>),
    /// Partitions about to be revoked from this consumer.
    Revoked(Vec<(String, i32)>),
}

/// Client context that logs rebalances and forwards them to the consumer
/// loop.
///
/// The callbacks run on the polling path and must not block, so they only
/// push onto an unbounded channel; the loop does the draining, committing
/// and seeking.
pub struct IngestContext {
    events: UnboundedSender<RebalanceEvent>,
}

impl IngestContext {
    /// Create a context forwarding rebalance events to `events`.
    #[must_use]
    pub const fn new(events: UnboundedSender<RebalanceEvent>) -> Self {
        Self { events }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

impl ClientContext for IngestContext {}

impl ConsumerContext for IngestContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let partitions = partitions_of(tpl);
            tracing::info!(?partitions, "partitions being revoked");
            metrics::counter!("audit_ingest_rebalances_total").increment(1);
            let _ = self.events.send(RebalanceEvent::Revoked(partitions));
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = partitions_of(tpl);
                tracing::info!(?partitions, "partitions assigned");
                let _ = self.events.send(RebalanceEvent::Assigned(partitions));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => {
                tracing::error!(error = %e, "rebalance error");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(e) = result {
            tracing::warn!(error = %e, ?offsets, "offset commit failed");
        }
    }
}
