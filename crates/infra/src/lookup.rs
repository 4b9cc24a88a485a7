//! Cache-aside task lookup.
//!
//! 1. Cache hit on `task:result:{id}` → the cached output object
//! 2. Miss → load the row; absent → `None`
//! 3. `done` row → build the output object (`processedAt = updatedAt`),
//!    backfill the cache, return it
//! 4. Any other row → returned as-is, nothing cached
//!
//! The cache is an accelerator only: read or write failures against it are
//! logged and the store answers instead.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use taskpipe_core::{Task, TaskId, TaskOutputMessage, result_cache_key};

use crate::context::TaskContext;
use crate::result_cache::ResultCache;
use crate::task_store::{TaskStore, TaskStoreError};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to load task: {0}")]
    Store(#[from] TaskStoreError),
}

/// A found task: the completion announcement when `done`, the raw row otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TaskLookup {
    Completed(TaskOutputMessage),
    Task(Task),
}

#[derive(Clone)]
pub struct LookupService {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn ResultCache>,
    result_ttl: Duration,
}

impl LookupService {
    pub fn new(ctx: &TaskContext) -> Self {
        Self {
            store: ctx.store.clone(),
            cache: ctx.cache.clone(),
            result_ttl: ctx.result_ttl,
        }
    }

    pub async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskLookup>, LookupError> {
        let key = result_cache_key(&id);

        if let Some(output) = self.cached(&key).await {
            debug!(task_id = %id, "result cache hit");
            return Ok(Some(TaskLookup::Completed(output)));
        }

        let Some(task) = self.store.get(id).await? else {
            return Ok(None);
        };

        let Some(output) = TaskOutputMessage::from_completed(&task) else {
            return Ok(Some(TaskLookup::Task(task)));
        };

        match serde_json::to_string(&output) {
            Ok(body) => {
                if let Err(e) = self.cache.set(&key, &body, self.result_ttl).await {
                    warn!(task_id = %id, error = %e, "failed to backfill result cache");
                }
            }
            Err(e) => warn!(task_id = %id, error = %e, "failed to serialize output for cache"),
        }

        Ok(Some(TaskLookup::Completed(output)))
    }

    async fn cached(&self, key: &str) -> Option<TaskOutputMessage> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "result cache read failed; falling back to store");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable cached result");
                None
            }
        }
    }
}
