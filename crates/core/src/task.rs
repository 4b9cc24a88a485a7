//! Task record and its lifecycle.
//!
//! ```text
//! pending ──► processing ──► done
//!                       └──► failed
//! ```
//!
//! Transitions are applied as plain writes (the store does not reject a
//! transition out of order), but every write keeps two invariants:
//!
//! - `result` is present iff `status == done`
//! - `updated_at` never moves backwards and `created_at` never changes

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

/// Current time truncated to millisecond precision.
///
/// Every timestamp the pipeline writes goes through here so that values read
/// back from Postgres (microseconds) or JSON (milliseconds) compare equal.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Advisory priority in `[0, 10]`.
///
/// Stored with the task and carried on the input message; consumption order
/// does not depend on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: i32 = 0;
    pub const MAX: i32 = 10;

    pub fn new(value: i32) -> DomainResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(DomainError::validation(format!(
                "priority must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(&self) -> i32 {
        i32::from(self.0)
    }
}

impl TryFrom<i32> for Priority {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i32 {
    fn from(value: Priority) -> Self {
        value.value()
    }
}

/// A state change written to the task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Processing,
    Done { result: String },
    Failed,
}

impl StatusUpdate {
    pub fn done(result: impl Into<String>) -> Self {
        Self::Done {
            result: result.into(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            StatusUpdate::Processing => TaskStatus::Processing,
            StatusUpdate::Done { .. } => TaskStatus::Done,
            StatusUpdate::Failed => TaskStatus::Failed,
        }
    }

    /// The result column value this update writes (cleared unless `done`).
    pub fn result(&self) -> Option<&str> {
        match self {
            StatusUpdate::Done { result } => Some(result),
            _ => None,
        }
    }
}

/// Durable task record (one row of the `tasks` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub payload: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly submitted task: `pending`, no result, both timestamps `at`.
    pub fn new(id: TaskId, payload: impl Into<String>, priority: Priority, at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload: payload.into(),
            priority,
            status: TaskStatus::Pending,
            result: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Apply a status update in place.
    pub fn apply(&mut self, update: &StatusUpdate, at: DateTime<Utc>) {
        self.status = update.status();
        self.result = update.result().map(str::to_owned);
        self.updated_at = self.updated_at.max(at);
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Check `result.is_some() == (status == done)`.
    pub fn result_matches_status(&self) -> bool {
        self.result.is_some() == self.is_done()
    }
}
