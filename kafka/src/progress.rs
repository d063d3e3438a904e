//! Per-partition commit bookkeeping.
//!
//! Workers process a partition strictly in order and emit one
//! [`CommitMark`] per accounted-for message, so the highest mark observed
//! for a partition is always the highest-contiguous offset: nothing can
//! be committed ahead of an unhandled message.

use std::collections::HashMap;

/// "The cursor for this partition may move to `next_offset`."
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMark {
    /// Topic of the accounted-for message.
    pub topic: String,
    /// Partition of the accounted-for message.
    pub partition: i32,
    /// The offset after it.
    pub next_offset: i64,
}

/// A partition's uncommitted progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCommit {
    /// Highest contiguous next-offset observed.
    pub next_offset: i64,
    /// Messages accounted for since the last commit.
    pub message_count: u64,
}

/// Accumulates commit marks between commit flushes.
#[derive(Debug, Default)]
pub struct PartitionProgress {
    pending: HashMap<(String, i32), PendingCommit>,
}

impl PartitionProgress {
    /// Create empty progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one mark into the pending state.
    pub fn observe(&mut self, mark: CommitMark) {
        let entry = self
            .pending
            .entry((mark.topic, mark.partition))
            .or_insert(PendingCommit {
                next_offset: mark.next_offset,
                message_count: 0,
            });
        entry.next_offset = entry.next_offset.max(mark.next_offset);
        entry.message_count += 1;
    }

    /// Drain everything pending, for a commit flush.
    #[must_use]
    pub fn take_all(&mut self) -> Vec<((String, i32), PendingCommit)> {
        self.pending.drain().collect()
    }

    /// Drain one partition's pending state, if any (revoke path).
    pub fn take_partition(&mut self, topic: &str, partition: i32) -> Option<PendingCommit> {
        self.pending.remove(&(topic.to_string(), partition))
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(partition: i32, next_offset: i64) -> CommitMark {
        CommitMark {
            topic: "orders.order.created".to_string(),
            partition,
            next_offset,
        }
    }

    #[test]
    fn marks_merge_to_highest_offset() {
        let mut progress = PartitionProgress::new();
        progress.observe(mark(0, 43));
        progress.observe(mark(0, 44));
        progress.observe(mark(0, 45));

        let drained = progress.take_all();
        assert_eq!(drained.len(), 1);
        let (_, pending) = &drained[0];
        assert_eq!(pending.next_offset, 45);
        assert_eq!(pending.message_count, 3);
        assert!(progress.is_empty());
    }

    #[test]
    fn partitions_are_tracked_independently() {
        let mut progress = PartitionProgress::new();
        progress.observe(mark(0, 10));
        progress.observe(mark(1, 20));

        let p0 = progress.take_partition("orders.order.created", 0);
        assert_eq!(
            p0,
            Some(PendingCommit {
                next_offset: 10,
                message_count: 1
            })
        );
        assert!(!progress.is_empty());
        assert!(progress.take_partition("orders.order.created", 0).is_none());
    }

    #[test]
    fn out_of_order_marks_never_rewind() {
        let mut progress = PartitionProgress::new();
        progress.observe(mark(0, 45));
        progress.observe(mark(0, 43));

        let drained = progress.take_all();
        assert_eq!(drained[0].1.next_offset, 45);
    }
}
