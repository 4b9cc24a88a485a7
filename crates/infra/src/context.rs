//! Shared client handles for one process.
//!
//! Built once at startup and cloned into every service and worker; nothing in
//! the pipeline reaches for global state.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use taskpipe_core::RESULT_CACHE_TTL;
use taskpipe_queue::{InMemoryQueue, MessageQueue, QueueError};

use crate::config::TaskpipeConfig;
use crate::result_cache::{CacheError, InMemoryResultCache, ResultCache};
use crate::task_store::{InMemoryTaskStore, TaskStore, TaskStoreError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("task store bootstrap failed: {0}")]
    Store(#[from] TaskStoreError),

    #[error("result cache bootstrap failed: {0}")]
    Cache(#[from] CacheError),

    #[error("queue bootstrap failed: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Clone)]
pub struct TaskContext {
    pub store: Arc<dyn TaskStore>,
    pub cache: Arc<dyn ResultCache>,
    pub queue: Arc<dyn MessageQueue>,
    pub result_ttl: Duration,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("partitions", &self.queue.partition_count())
            .field("result_ttl", &self.result_ttl)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub fn new(
        store: Arc<dyn TaskStore>,
        cache: Arc<dyn ResultCache>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            result_ttl: RESULT_CACHE_TTL,
        }
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// In-memory wiring (dev/test): store + cache + queue, no IO.
    pub fn in_memory(partitions: u32) -> Self {
        Self::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryResultCache::new()),
            Arc::new(InMemoryQueue::new(partitions)),
        )
    }

    /// Build the context `config` asks for.
    ///
    /// Falls back to in-memory wiring when persistent stores are requested but
    /// the `redis` feature is not compiled in.
    pub async fn from_config(config: &TaskpipeConfig) -> Result<Self, BootstrapError> {
        if !config.use_persistent_stores {
            info!(partitions = config.partitions, "using in-memory stores");
            return Ok(Self::in_memory(config.partitions).with_result_ttl(config.result_cache_ttl));
        }

        #[cfg(feature = "redis")]
        {
            Self::persistent(config).await
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
            Ok(Self::in_memory(config.partitions).with_result_ttl(config.result_cache_ttl))
        }
    }

    /// Postgres store + Redis cache + Redis Streams queue.
    #[cfg(feature = "redis")]
    pub async fn persistent(config: &TaskpipeConfig) -> Result<Self, BootstrapError> {
        use crate::queue::RedisStreamsQueue;
        use crate::result_cache::RedisResultCache;
        use crate::task_store::PostgresTaskStore;

        let store = PostgresTaskStore::connect(&config.database_url).await?;
        store.ensure_schema().await?;

        let cache = RedisResultCache::connect(&config.redis_url).await?;
        let queue = RedisStreamsQueue::connect(&config.redis_url, config.partitions).await?;

        info!(partitions = config.partitions, "using persistent stores");

        Ok(
            Self::new(Arc::new(store), Arc::new(cache), Arc::new(queue))
                .with_result_ttl(config.result_cache_ttl),
        )
    }
}
