//! Queue transport abstraction.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once per consumer group**: a delivery that is not acknowledged
//!   is handed out again to the next subscription of that group/partition
//! - **Per-key ordering**: records with the same key share a partition, and a
//!   partition is read in publish order
//! - **No cross-partition ordering**: partitions are independent streams and
//!   may be consumed concurrently
//!
//! Consumers must therefore tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Where a consumer group starts reading a partition it has never read before.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Only records published after the group was created.
    #[default]
    Latest,
    /// Everything still retained in the partition.
    Earliest,
}

/// A keyed record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Record whose value is the JSON serialization of `body`.
    pub fn json<T: Serialize>(key: impl Into<String>, body: &T) -> Result<Self, QueueError> {
        let value =
            serde_json::to_vec(body).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(Self::new(key, value))
    }
}

/// A record handed to a consumer, with enough metadata to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    /// Transport-specific position (offset or stream entry id).
    pub id: String,
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid delivery id: {0}")]
    InvalidDeliveryId(String),

    #[error("partition {partition} out of range for topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("queue state poisoned")]
    Poisoned,
}

/// Producer side plus the factory for per-partition consumers.
///
/// Implementations are shared process-wide and must be safe for concurrent
/// use; `publish` returns once the transport has accepted the record.
#[async_trait::async_trait]
pub trait MessageQueue: Send + Sync {
    /// Number of partitions every topic is split into.
    fn partition_count(&self) -> u32;

    async fn publish(&self, topic: &str, record: Record) -> Result<(), QueueError>;

    /// Join `group` as the consumer of one partition of `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn Subscription>, QueueError>;
}

/// A consumer-group member reading one partition.
///
/// Designed for a single consumer loop; not meant to be shared.
#[async_trait::async_trait]
pub trait Subscription: Send {
    /// Wait up to `wait` for at most `max` deliveries. An empty batch means
    /// nothing arrived in time.
    async fn next_batch(&mut self, max: usize, wait: Duration)
    -> Result<Vec<Delivery>, QueueError>;

    /// Mark a delivery as handled for this group.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError>;
}

#[async_trait::async_trait]
impl<Q> MessageQueue for Arc<Q>
where
    Q: MessageQueue + ?Sized,
{
    fn partition_count(&self) -> u32 {
        (**self).partition_count()
    }

    async fn publish(&self, topic: &str, record: Record) -> Result<(), QueueError> {
        (**self).publish(topic, record).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn Subscription>, QueueError> {
        (**self).subscribe(topic, group, partition).await
    }
}
