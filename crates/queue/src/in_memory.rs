//! In-memory partitioned queue for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::partitioner::partition_for;
use crate::transport::{Delivery, MessageQueue, OffsetReset, QueueError, Record, Subscription};

/// In-memory partitioned log with consumer-group offsets.
///
/// - No IO
/// - Records are retained for the life of the queue
/// - Offsets are committed per `(topic, group, partition)` on `ack`
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    partitions: u32,
    reset: OffsetReset,
    state: Mutex<State>,
    published: Notify,
}

#[derive(Debug, Default)]
struct State {
    logs: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<GroupKey, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    topic: String,
    group: String,
    partition: u32,
}

impl State {
    fn partition_log(&mut self, topic: &str, partitions: u32, partition: u32) -> &mut Vec<Record> {
        let logs = self
            .logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize]);
        &mut logs[partition as usize]
    }
}

impl InMemoryQueue {
    pub fn new(partitions: u32) -> Self {
        Self::with_offset_reset(partitions, OffsetReset::Latest)
    }

    pub fn with_offset_reset(partitions: u32, reset: OffsetReset) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                reset,
                state: Mutex::new(State::default()),
                published: Notify::new(),
            }),
        }
    }

    /// All records published to `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let state = match self.inner.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        state
            .logs
            .get(topic)
            .map(|parts| parts.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Records published to one partition of `topic`, in publish order.
    pub fn partition_records(&self, topic: &str, partition: u32) -> Vec<Record> {
        let state = match self.inner.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        state
            .logs
            .get(topic)
            .and_then(|parts| parts.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    fn check_partition(&self, topic: &str, partition: u32) -> Result<(), QueueError> {
        if partition >= self.inner.partitions {
            return Err(QueueError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait::async_trait]
impl MessageQueue for InMemoryQueue {
    fn partition_count(&self) -> u32 {
        self.inner.partitions
    }

    async fn publish(&self, topic: &str, record: Record) -> Result<(), QueueError> {
        let partition = partition_for(&record.key, self.inner.partitions);
        {
            let mut state = self.inner.state.lock().map_err(|_| QueueError::Poisoned)?;
            state
                .partition_log(topic, self.inner.partitions, partition)
                .push(record);
        }
        self.inner.published.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn Subscription>, QueueError> {
        self.check_partition(topic, partition)?;

        let key = GroupKey {
            topic: topic.to_string(),
            group: group.to_string(),
            partition,
        };

        let position = {
            let mut state = self.inner.state.lock().map_err(|_| QueueError::Poisoned)?;
            let end = state
                .partition_log(topic, self.inner.partitions, partition)
                .len();
            let start = match self.inner.reset {
                OffsetReset::Latest => end,
                OffsetReset::Earliest => 0,
            };
            let position = *state.committed.entry(key.clone()).or_insert(start);
            if position < end {
                debug!(
                    topic,
                    group,
                    partition,
                    backlog = end - position,
                    "group resumes behind the partition head"
                );
            }
            position
        };

        Ok(Box::new(InMemorySubscription {
            inner: self.inner.clone(),
            key,
            position,
        }))
    }
}

/// Reads one partition on behalf of a consumer group.
///
/// Starts at the group's committed offset, so unacknowledged deliveries from
/// an earlier subscription are seen again.
#[derive(Debug)]
pub struct InMemorySubscription {
    inner: Arc<Inner>,
    key: GroupKey,
    position: usize,
}

impl InMemorySubscription {
    fn take(&mut self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut state = self.inner.state.lock().map_err(|_| QueueError::Poisoned)?;
        let log = state.partition_log(&self.key.topic, self.inner.partitions, self.key.partition);

        let end = log.len().min(self.position + max);
        let batch = log[self.position.min(end)..end]
            .iter()
            .enumerate()
            .map(|(i, record)| Delivery {
                topic: self.key.topic.clone(),
                partition: self.key.partition,
                id: (self.position + i).to_string(),
                key: record.key.clone(),
                value: record.value.clone(),
            })
            .collect::<Vec<_>>();

        self.position += batch.len();
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl Subscription for InMemorySubscription {
    async fn next_batch(
        &mut self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        // Register for wake-ups before checking, so a publish in between is not missed.
        let published = self.inner.clone();
        let notified = published.published.notified();

        let batch = self.take(max)?;
        if !batch.is_empty() || wait.is_zero() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(wait, notified).await;
        self.take(max)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        let offset: usize = delivery.id.parse().map_err(|_| {
            warn!(topic = %self.key.topic, id = %delivery.id, "ack with foreign delivery id");
            QueueError::InvalidDeliveryId(delivery.id.clone())
        })?;

        let mut state = self.inner.state.lock().map_err(|_| QueueError::Poisoned)?;
        let committed = state.committed.entry(self.key.clone()).or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "orders";

    #[tokio::test]
    async fn latest_group_skips_records_published_before_it_joined() {
        let queue = InMemoryQueue::new(1);
        queue.publish(TOPIC, Record::new("k", "before")).await.unwrap();

        let mut sub = queue.subscribe(TOPIC, "g", 0).await.unwrap();
        queue.publish(TOPIC, Record::new("k", "after")).await.unwrap();

        let batch = sub.next_batch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, b"after");
    }

    #[tokio::test]
    async fn earliest_group_reads_from_the_start() {
        let queue = InMemoryQueue::with_offset_reset(1, OffsetReset::Earliest);
        queue.publish(TOPIC, Record::new("k", "one")).await.unwrap();
        queue.publish(TOPIC, Record::new("k", "two")).await.unwrap();

        let mut sub = queue.subscribe(TOPIC, "g", 0).await.unwrap();
        let batch = sub.next_batch(10, Duration::ZERO).await.unwrap();
        let values: Vec<_> = batch.iter().map(|d| d.value.clone()).collect();
        assert_eq!(values, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn same_key_lands_on_one_partition_in_order() {
        let queue = InMemoryQueue::new(4);
        for i in 0..5 {
            queue
                .publish(TOPIC, Record::new("same-key", format!("m{i}")))
                .await
                .unwrap();
        }

        let partition = partition_for("same-key", 4);
        let records = queue.partition_records(TOPIC, partition);
        let values: Vec<_> = records.iter().map(|r| r.value.clone()).collect();
        let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("m{i}").into_bytes()).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn unacked_deliveries_are_redelivered_to_the_group() {
        let queue = InMemoryQueue::with_offset_reset(1, OffsetReset::Earliest);
        queue.publish(TOPIC, Record::new("k", "a")).await.unwrap();
        queue.publish(TOPIC, Record::new("k", "b")).await.unwrap();

        let mut first = queue.subscribe(TOPIC, "g", 0).await.unwrap();
        let batch = first.next_batch(10, Duration::ZERO).await.unwrap();
        first.ack(&batch[0]).await.unwrap();
        drop(first);

        let mut second = queue.subscribe(TOPIC, "g", 0).await.unwrap();
        let batch = second.next_batch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, b"b");
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let queue = InMemoryQueue::with_offset_reset(1, OffsetReset::Earliest);
        queue.publish(TOPIC, Record::new("k", "x")).await.unwrap();

        let mut a = queue.subscribe(TOPIC, "a", 0).await.unwrap();
        let mut b = queue.subscribe(TOPIC, "b", 0).await.unwrap();

        assert_eq!(a.next_batch(10, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(b.next_batch(10, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_publish() {
        let queue = InMemoryQueue::new(1);
        let mut sub = queue.subscribe(TOPIC, "g", 0).await.unwrap();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish(TOPIC, Record::new("k", "late")).await.unwrap();
        });

        let batch = sub.next_batch(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn ack_rejects_non_offset_delivery_id() {
        let queue = InMemoryQueue::new(1);
        let mut sub = queue.subscribe(TOPIC, "g", 0).await.unwrap();
        let delivery = Delivery {
            topic: TOPIC.to_string(),
            partition: 0,
            id: "1700000000000-0".to_string(),
            key: "k".to_string(),
            value: Vec::new(),
        };

        let err = sub.ack(&delivery).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidDeliveryId(id) if id == "1700000000000-0"));
    }

    #[tokio::test]
    async fn out_of_range_partition_is_rejected() {
        let queue = InMemoryQueue::new(2);
        let err = queue.subscribe(TOPIC, "g", 2).await.err().unwrap();
        assert!(matches!(err, QueueError::UnknownPartition { .. }));
    }
}
