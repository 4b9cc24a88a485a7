//! In-memory task store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use taskpipe_core::{StatusUpdate, Task, TaskId, TaskStatus};

use super::{CompletionMetrics, TaskStore, TaskStoreError};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored task (unordered).
    pub fn all(&self) -> Vec<Task> {
        self.tasks
            .read()
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().map_err(|_| TaskStoreError::Poisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let tasks = self.tasks.read().map_err(|_| TaskStoreError::Poisoned)?;
        Ok(tasks.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: TaskId,
        update: &StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<u64, TaskStoreError> {
        let mut tasks = self.tasks.write().map_err(|_| TaskStoreError::Poisoned)?;
        match tasks.get_mut(&id) {
            Some(task) => {
                task.apply(update, at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn completion_metrics(&self) -> Result<CompletionMetrics, TaskStoreError> {
        let tasks = self.tasks.read().map_err(|_| TaskStoreError::Poisoned)?;
        let durations: Vec<i64> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| (t.updated_at - t.created_at).num_milliseconds())
            .collect();

        let total_tasks = durations.len() as u64;
        let average_processing_time_ms = if durations.is_empty() {
            None
        } else {
            let sum: i64 = durations.iter().sum();
            Some((sum as f64 / durations.len() as f64).round() as i64)
        };

        Ok(CompletionMetrics {
            total_tasks,
            average_processing_time_ms,
        })
    }
}
