//! # Audit Trail Kafka
//!
//! The consumer side of the pipeline: a Kafka (or any Kafka-compatible
//! broker, e.g. Redpanda) `StreamConsumer` with manual offset commits,
//! one worker task per assigned partition, and rebalance-aware commit
//! bookkeeping.
//!
//! # Delivery semantics
//!
//! **At-least-once** from the bus, with manual commits:
//! - A partition's offset is committed only after every message up to it
//!   is *accounted for*: persisted, deduplicated, or dead-lettered.
//! - If the process dies before a commit, messages are re-delivered and
//!   absorbed by `event_id` idempotency at the store.
//! - Ordering is preserved within a partition (strictly sequential
//!   worker); partitions are independent of each other.
//!
//! # Architecture
//!
//! ```text
//!  StreamConsumer ──recv()──► ConsumerLoop ──bounded mpsc──► partition worker (one per
//!        ▲                        │   ▲                      assigned partition, in-order
//!        │ commit(tpl)            │   └──commit marks──      dispatch into the pipeline)
//!        └────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod context;
mod progress;

pub use consumer::{ConsumerError, ConsumerLoop, ConsumerLoopBuilder, build_consumer, subscribe};
pub use context::{IngestContext, RebalanceEvent};
pub use progress::{CommitMark, PartitionProgress};
