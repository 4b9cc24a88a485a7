//! Infrastructure layer: task store, result cache, queue adapters, and the
//! task lifecycle pipeline wired on top of them.

pub mod config;
pub mod context;
pub mod lookup;
pub mod processor;
pub mod queue;
pub mod result_cache;
pub mod submission;
pub mod task_store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, TaskpipeConfig};
pub use context::{BootstrapError, TaskContext};
pub use lookup::{LookupError, LookupService, TaskLookup};
pub use processor::{ProcessOutcome, ProcessingError, TaskProcessor};
pub use result_cache::{CacheError, InMemoryResultCache, ResultCache};
pub use submission::{SubmissionService, SubmitError, SubmittedTask};
pub use task_store::{CompletionMetrics, InMemoryTaskStore, TaskStore, TaskStoreError};
pub use workers::{ProcessorWorker, WorkerHandle};
