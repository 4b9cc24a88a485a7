//! Task submission (application-level orchestration).
//!
//! ```text
//! create(payload, priority)
//!   ↓
//! 1. Insert a `pending` row (server-generated id and timestamps)
//!   ↓
//! 2. Publish `{taskId, payload, priority}` to `tasks-input`, keyed by id
//! ```
//!
//! The row is durable before publication is attempted. A failed publish is
//! logged and swallowed: the caller still gets the created identity and the
//! row stays `pending` with nothing to move it forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use taskpipe_core::{
    Priority, TASKS_INPUT_TOPIC, Task, TaskId, TaskInputMessage, TaskStatus, now,
};
use taskpipe_queue::{MessageQueue, Record};

use crate::context::TaskContext;
use crate::task_store::{TaskStore, TaskStoreError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to persist task: {0}")]
    Store(#[from] TaskStoreError),
}

/// Identity handed back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTask {
    pub id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn MessageQueue>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { store, queue }
    }

    pub fn from_context(ctx: &TaskContext) -> Self {
        Self::new(ctx.store.clone(), ctx.queue.clone())
    }

    pub async fn create(
        &self,
        payload: impl Into<String>,
        priority: Priority,
    ) -> Result<SubmittedTask, SubmitError> {
        let task = Task::new(TaskId::new(), payload, priority, now());
        self.store.insert(&task).await?;

        if let Err(e) = self.publish(&task).await {
            error!(task_id = %task.id, error = %e, "failed to publish task; it stays pending");
        }

        Ok(SubmittedTask {
            id: task.id,
            status: task.status,
            created_at: task.created_at,
        })
    }

    async fn publish(&self, task: &Task) -> Result<(), taskpipe_queue::QueueError> {
        let record = Record::json(task.id.to_string(), &TaskInputMessage::from_task(task))?;
        self.queue.publish(TASKS_INPUT_TOPIC, record).await?;
        info!(task_id = %task.id, topic = TASKS_INPUT_TOPIC, "task published");
        Ok(())
    }
}
