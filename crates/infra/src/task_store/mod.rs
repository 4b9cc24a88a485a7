//! Durable task records (source of truth for status and result).
//!
//! Status updates are plain writes keyed by id: updating an id with no row
//! affects zero rows and is not an error. Callers that care can inspect the
//! returned row count.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use taskpipe_core::{StatusUpdate, Task, TaskId};

pub use in_memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("task store connection error: {0}")]
    Connection(String),

    #[error("task store query failed: {0}")]
    Query(String),

    #[error("failed to decode task row: {0}")]
    Decode(String),

    #[error("task store state poisoned")]
    Poisoned,
}

/// Aggregate over completed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMetrics {
    /// Number of tasks in `done`.
    pub total_tasks: u64,
    /// Mean `updated_at - created_at` over `done` tasks, rounded to ms.
    pub average_processing_time_ms: Option<i64>,
}

#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task row.
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// Write a status transition; returns the number of rows affected.
    async fn update_status(
        &self,
        id: TaskId,
        update: &StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<u64, TaskStoreError>;

    async fn completion_metrics(&self) -> Result<CompletionMetrics, TaskStoreError>;
}

#[async_trait::async_trait]
impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
        (**self).insert(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        (**self).get(id).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        update: &StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<u64, TaskStoreError> {
        (**self).update_status(id, update, at).await
    }

    async fn completion_metrics(&self) -> Result<CompletionMetrics, TaskStoreError> {
        (**self).completion_metrics().await
    }
}
