//! Per-message task processing.
//!
//! ```text
//! tasks-input record
//!   ↓
//! 1. Parse (malformed → log and drop)
//!   ↓
//! 2. Mark `processing` (best effort)
//!   ↓
//! 3. Run the work function
//!   ↓
//! 4. Store `done` + result → cache output → publish to `tasks-output`
//!   ↓ (any error in 3 or 4)
//! 5. Mark `failed`
//! ```
//!
//! The three writes of step 4 are independent. A failure part-way leaves the
//! earlier writes in place: the cache may hold a result for a task the store
//! reports as `failed`, and a record accepted by the transport before it
//! reported an error stays on `tasks-output`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use taskpipe_core::{
    StatusUpdate, TASKS_OUTPUT_TOPIC, TaskId, TaskInputMessage, TaskOutputMessage, WorkError,
    WorkFunction, now, result_cache_key,
};
use taskpipe_queue::{MessageQueue, QueueError, Record};

use crate::context::TaskContext;
use crate::result_cache::{CacheError, ResultCache};
use crate::task_store::{TaskStore, TaskStoreError};

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Work(#[from] WorkError),

    #[error("task store write failed: {0}")]
    Store(#[from] TaskStoreError),

    #[error("result cache write failed: {0}")]
    Cache(#[from] CacheError),

    #[error("output publish failed: {0}")]
    Publish(#[from] QueueError),

    #[error("failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to one consumed record.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Unparseable record; no state was touched.
    Dropped,
    /// Task reached `done`; the output was cached and published.
    Completed(TaskOutputMessage),
    /// Task was marked `failed` (or the attempt to mark it was logged).
    Failed {
        task_id: TaskId,
        error: ProcessingError,
    },
}

#[derive(Clone)]
pub struct TaskProcessor {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn ResultCache>,
    queue: Arc<dyn MessageQueue>,
    work: Arc<dyn WorkFunction>,
    result_ttl: Duration,
}

impl TaskProcessor {
    pub fn new(ctx: &TaskContext, work: Arc<dyn WorkFunction>) -> Self {
        Self {
            store: ctx.store.clone(),
            cache: ctx.cache.clone(),
            queue: ctx.queue.clone(),
            work,
            result_ttl: ctx.result_ttl,
        }
    }

    /// Handle one raw `tasks-input` record. Never fails: every error is
    /// contained here so the consumer loop can move on.
    pub async fn handle(&self, raw: &[u8]) -> ProcessOutcome {
        if raw.is_empty() {
            warn!("dropping empty input record");
            return ProcessOutcome::Dropped;
        }

        let message: TaskInputMessage = match serde_json::from_slice(raw) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "invalid input message JSON; dropping");
                return ProcessOutcome::Dropped;
            }
        };

        self.process(message).await
    }

    pub async fn process(&self, message: TaskInputMessage) -> ProcessOutcome {
        let task_id = message.task_id;

        match self
            .store
            .update_status(task_id, &StatusUpdate::Processing, now())
            .await
        {
            Ok(0) => warn!(%task_id, "no task row to mark processing; continuing"),
            Ok(_) => {}
            Err(e) => warn!(%task_id, error = %e, "failed to mark task processing"),
        }

        match self.complete(&message).await {
            Ok(output) => {
                info!(%task_id, "task processed");
                ProcessOutcome::Completed(output)
            }
            Err(error) => {
                error!(%task_id, error = %error, "task processing failed");
                if let Err(e) = self
                    .store
                    .update_status(task_id, &StatusUpdate::Failed, now())
                    .await
                {
                    error!(%task_id, error = %e, "failed to mark task failed");
                }
                ProcessOutcome::Failed { task_id, error }
            }
        }
    }

    async fn complete(
        &self,
        message: &TaskInputMessage,
    ) -> Result<TaskOutputMessage, ProcessingError> {
        let task_id = message.task_id;
        let result = self.work.process(&message.payload)?;

        let processed_at = now();
        let output = TaskOutputMessage::new(task_id, result.clone(), processed_at);
        let body = serde_json::to_string(&output)?;

        self.store
            .update_status(task_id, &StatusUpdate::done(result), processed_at)
            .await?;

        self.cache
            .set(&result_cache_key(&task_id), &body, self.result_ttl)
            .await?;

        self.queue
            .publish(TASKS_OUTPUT_TOPIC, Record::new(task_id.to_string(), body))
            .await?;

        Ok(output)
    }
}
