//! Redis Streams-backed partitioned queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Stream key**: `{topic}:{partition}`, one stream per topic partition
//! - **Entry fields**: `key` (partition key) and `value` (record bytes)
//! - **Consumer groups**: created lazily with `MKSTREAM`, starting at `$`
//!   ([`OffsetReset::Latest`]) or `0` ([`OffsetReset::Earliest`])
//! - **Consumers**: one named consumer per group/partition
//!   (`{prefix}-{partition}`), so a restarted worker first drains the entries
//!   it read but never acknowledged
//!
//! A consumer group is expected to have a single worker process. Two processes
//! sharing a group and prefix read the same partition under one consumer name,
//! which splits entries between them and loses per-key ordering. Deployments
//! that run separate pipelines against one Redis give each its own group.
//!
//! Partition selection uses the same murmur2 mapping as the in-memory queue.

use std::time::Duration;

use redis::Value;
use redis::aio::ConnectionManager;
use tracing::{debug, instrument, warn};

use taskpipe_queue::{
    Delivery, MessageQueue, OffsetReset, QueueError, Record, Subscription, partition_for,
};

const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";

#[derive(Clone)]
pub struct RedisStreamsQueue {
    connection: ConnectionManager,
    partitions: u32,
    reset: OffsetReset,
    consumer_prefix: String,
}

impl std::fmt::Debug for RedisStreamsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsQueue")
            .field("partitions", &self.partitions)
            .field("reset", &self.reset)
            .field("consumer_prefix", &self.consumer_prefix)
            .finish()
    }
}

impl RedisStreamsQueue {
    /// Connect to Redis.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `partitions` - Number of streams each topic is split into
    pub async fn connect(redis_url: &str, partitions: u32) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Connection(format!("invalid redis url: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            connection,
            partitions: partitions.max(1),
            reset: OffsetReset::default(),
            consumer_prefix: "taskpipe".to_string(),
        })
    }

    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.reset = reset;
        self
    }

    /// Prefix for consumer names inside a group (`{prefix}-{partition}`).
    pub fn with_consumer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_prefix = prefix.into();
        self
    }

    pub fn stream_key(topic: &str, partition: u32) -> String {
        format!("{topic}:{partition}")
    }

    /// Create the consumer group for one partition stream (idempotent).
    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let start = match self.reset {
            OffsetReset::Latest => "$",
            OffsetReset::Earliest => "0",
        };

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }
}

#[async_trait::async_trait]
impl MessageQueue for RedisStreamsQueue {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    #[instrument(skip(self, record), fields(key = %record.key, partition = tracing::field::Empty), err)]
    async fn publish(&self, topic: &str, record: Record) -> Result<(), QueueError> {
        let partition = partition_for(&record.key, self.partitions);
        tracing::Span::current().record("partition", partition);

        let mut conn = self.connection.clone();
        let _: String = redis::cmd("XADD")
            .arg(Self::stream_key(topic, partition))
            .arg("*")
            .arg(KEY_FIELD)
            .arg(&record.key)
            .arg(VALUE_FIELD)
            .arg(&record.value)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn Subscription>, QueueError> {
        if partition >= self.partitions {
            return Err(QueueError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let stream = Self::stream_key(topic, partition);
        self.ensure_consumer_group(&stream, group).await?;

        Ok(Box::new(RedisStreamsSubscription {
            connection: self.connection.clone(),
            topic: topic.to_string(),
            partition,
            stream,
            group: group.to_string(),
            consumer: consumer_name(&self.consumer_prefix, partition),
            draining_pending: true,
        }))
    }
}

/// Consumer-group member reading one partition stream.
pub struct RedisStreamsSubscription {
    connection: ConnectionManager,
    topic: String,
    partition: u32,
    stream: String,
    group: String,
    consumer: String,
    /// While set, reads replay this consumer's unacknowledged entries (`0`)
    /// instead of new ones (`>`).
    draining_pending: bool,
}

fn consumer_name(prefix: &str, partition: u32) -> String {
    format!("{prefix}-{partition}")
}

impl RedisStreamsSubscription {
    async fn read(
        &mut self,
        start: &str,
        max: usize,
        block: Option<Duration>,
    ) -> Result<ReadBatch, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max.max(1));
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(start);

        let mut conn = self.connection.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        parse_read_reply(reply)
    }

    fn deliveries(&self, entries: Vec<StreamEntry>) -> Vec<Delivery> {
        entries
            .into_iter()
            .map(|(id, key, value)| Delivery {
                topic: self.topic.clone(),
                partition: self.partition,
                id,
                key,
                value,
            })
            .collect()
    }

    async fn ack_ids(&mut self, ids: &[String]) -> Result<u64, QueueError> {
        let mut conn = self.connection.clone();
        redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(ids)
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))
    }
}

#[async_trait::async_trait]
impl Subscription for RedisStreamsSubscription {
    async fn next_batch(
        &mut self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        while self.draining_pending {
            let batch = self.read("0", max, None).await?;
            if batch.is_empty() {
                self.draining_pending = false;
                break;
            }
            // Trimmed entries have no payload left; ack them so the pending
            // list advances past them.
            if !batch.trimmed.is_empty() {
                warn!(
                    stream = %self.stream,
                    count = batch.trimmed.len(),
                    "acknowledging pending entries trimmed from the stream"
                );
                self.ack_ids(&batch.trimmed).await?;
            }
            if !batch.entries.is_empty() {
                debug!(
                    stream = %self.stream,
                    count = batch.entries.len(),
                    "redelivering unacknowledged entries"
                );
                return Ok(self.deliveries(batch.entries));
            }
        }

        let batch = self.read(">", max, Some(wait)).await?;
        Ok(self.deliveries(batch.entries))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        let acked = self.ack_ids(std::slice::from_ref(&delivery.id)).await?;
        if acked == 0 {
            warn!(stream = %self.stream, id = %delivery.id, "ack matched no pending entry");
        }
        Ok(())
    }
}

type StreamEntry = (String, String, Vec<u8>);

/// Entries of one `XREADGROUP` reply. `trimmed` holds ids of pending entries
/// whose payload was trimmed from the stream.
#[derive(Debug, Default, PartialEq)]
struct ReadBatch {
    entries: Vec<StreamEntry>,
    trimmed: Vec<String>,
}

impl ReadBatch {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.trimmed.is_empty()
    }
}

/// Parse an `XREADGROUP` reply for a single stream.
///
/// Reply shape: `[[stream, [[id, [field, value, ...]], ...]]]`, or nil when a
/// blocking read timed out.
fn parse_read_reply(reply: Value) -> Result<ReadBatch, QueueError> {
    let streams = match reply {
        Value::Nil => return Ok(ReadBatch::default()),
        Value::Bulk(streams) => streams,
        other => return Err(malformed(format!("unexpected reply {other:?}"))),
    };

    let mut batch = ReadBatch::default();
    for stream in streams {
        let Value::Bulk(mut parts) = stream else {
            return Err(malformed("stream element is not an array"));
        };
        if parts.len() != 2 {
            return Err(malformed("stream element must be [name, entries]"));
        }
        let Value::Bulk(raw_entries) = parts.swap_remove(1) else {
            // Nil entries list: no data for this stream.
            continue;
        };
        for raw in raw_entries {
            match parse_entry(raw)? {
                ParsedEntry::Live(entry) => batch.entries.push(entry),
                ParsedEntry::Trimmed(id) => batch.trimmed.push(id),
            }
        }
    }
    Ok(batch)
}

enum ParsedEntry {
    Live(StreamEntry),
    /// Trimmed from the stream while still pending; the field list is nil.
    Trimmed(String),
}

/// Parse `[id, [field, value, ...]]`.
fn parse_entry(raw: Value) -> Result<ParsedEntry, QueueError> {
    let Value::Bulk(mut parts) = raw else {
        return Err(malformed("entry is not an array"));
    };
    if parts.len() != 2 {
        return Err(malformed("entry must be [id, fields]"));
    }
    let fields = parts.swap_remove(1);
    let id = match parts.swap_remove(0) {
        Value::Data(bytes) => String::from_utf8(bytes)
            .map_err(|_| QueueError::InvalidDeliveryId("non-utf8 entry id".to_string()))?,
        Value::Status(s) => s,
        other => return Err(malformed(format!("entry id {other:?}"))),
    };

    let fields = match fields {
        Value::Bulk(fields) => fields,
        Value::Nil => return Ok(ParsedEntry::Trimmed(id)),
        other => return Err(malformed(format!("entry fields {other:?}"))),
    };

    let mut key = None;
    let mut value = None;
    for pair in fields.chunks(2) {
        if let [Value::Data(name), Value::Data(data)] = pair {
            match name.as_slice() {
                b"key" => key = Some(String::from_utf8_lossy(data).into_owned()),
                b"value" => value = Some(data.clone()),
                _ => {}
            }
        }
    }

    let key = key.ok_or_else(|| malformed(format!("entry {id} missing `{KEY_FIELD}`")))?;
    let value = value.ok_or_else(|| malformed(format!("entry {id} missing `{VALUE_FIELD}`")))?;
    Ok(ParsedEntry::Live((id, key, value)))
}

fn malformed(detail: impl Into<String>) -> QueueError {
    QueueError::Serialization(format!("malformed XREADGROUP reply: {}", detail.into()))
}
