//! Partitioned message transport (mechanics only).
//!
//! Topics are split into a fixed number of partitions. A record's key picks
//! its partition, so records sharing a key are delivered in publish order to
//! one consumer at a time within a consumer group. Delivery is at-least-once
//! per group: anything read but not acknowledged is handed out again when the
//! partition is next subscribed.

pub mod in_memory;
pub mod partitioner;
pub mod transport;

pub use in_memory::InMemoryQueue;
pub use partitioner::{murmur2, partition_for};
pub use transport::{Delivery, MessageQueue, OffsetReset, QueueError, Record, Subscription};
