//! `taskpipe-core`: task lifecycle domain.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the task record and its state machine, the wire shapes carried on the queue
//! and in the result cache, and the pluggable work function.

pub mod error;
pub mod id;
pub mod message;
pub mod task;
pub mod work;

pub use error::{DomainError, DomainResult};
pub use id::TaskId;
pub use message::{
    RESULT_CACHE_TTL, TASKS_INPUT_TOPIC, TASKS_OUTPUT_TOPIC, TaskInputMessage, TaskOutputMessage,
    result_cache_key,
};
pub use task::{Priority, StatusUpdate, Task, TaskStatus, now};
pub use work::{ReverseWithLength, WorkError, WorkFunction};
