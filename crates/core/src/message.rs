//! Wire shapes shared by the queue topics and the result cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TaskId;
use crate::task::Task;

/// Submission → processor.
pub const TASKS_INPUT_TOPIC: &str = "tasks-input";

/// Processor → downstream listeners.
pub const TASKS_OUTPUT_TOPIC: &str = "tasks-output";

/// Lifetime of a cached result, counted from the write.
pub const RESULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Cache key under which a completed task's output message is stored.
pub fn result_cache_key(task_id: &TaskId) -> String {
    format!("task:result:{task_id}")
}

/// Message published to `tasks-input`, keyed by `taskId`.
///
/// A projection of the task at submission time; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInputMessage {
    pub task_id: TaskId,
    pub payload: String,
    pub priority: i32,
}

impl TaskInputMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            payload: task.payload.clone(),
            priority: task.priority.value(),
        }
    }
}

/// The "done" announcement.
///
/// Published to `tasks-output` and cached verbatim under
/// [`result_cache_key`]; the lookup path rebuilds exactly this shape from a
/// completed row so both read paths return the same object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutputMessage {
    pub task_id: TaskId,
    pub result: String,
    #[serde(with = "iso_millis")]
    pub processed_at: DateTime<Utc>,
}

impl TaskOutputMessage {
    pub fn new(task_id: TaskId, result: impl Into<String>, processed_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            result: result.into(),
            processed_at,
        }
    }

    /// Output object for a completed row (`processedAt = updatedAt`).
    ///
    /// Returns `None` unless the task is `done` with a result.
    pub fn from_completed(task: &Task) -> Option<Self> {
        match (&task.result, task.is_done()) {
            (Some(result), true) => Some(Self::new(task.id, result.clone(), task.updated_at)),
            _ => None,
        }
    }
}

/// ISO-8601 with exactly three fractional digits and a `Z` suffix.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
