//! Pipeline service wiring for the HTTP process.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use taskpipe_core::ReverseWithLength;
use taskpipe_infra::{
    BootstrapError, LookupService, ProcessorWorker, SubmissionService, TaskContext,
    TaskProcessor, TaskStore, TaskpipeConfig, WorkerHandle,
};
use taskpipe_queue::QueueError;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("failed to start in-process worker: {0}")]
    Worker(#[from] QueueError),
}

/// Request-scoped services shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub submission: SubmissionService,
    pub lookup: LookupService,
    pub store: Arc<dyn TaskStore>,
}

impl AppServices {
    pub fn new(ctx: &TaskContext) -> Self {
        Self {
            submission: SubmissionService::from_context(ctx),
            lookup: LookupService::new(ctx),
            store: ctx.store.clone(),
        }
    }
}

/// Build services from configuration.
///
/// With in-memory stores nothing else can reach the queue, so the processor
/// worker runs inside this process and its handle is returned for shutdown.
pub async fn build_services(
    config: &TaskpipeConfig,
) -> Result<(Arc<AppServices>, Option<WorkerHandle>), ServicesError> {
    let ctx = TaskContext::from_config(config).await?;
    let services = Arc::new(AppServices::new(&ctx));

    let worker = if config.use_persistent_stores {
        None
    } else {
        info!("starting in-process processor worker");
        let processor = TaskProcessor::new(&ctx, Arc::new(ReverseWithLength));
        Some(ProcessorWorker::spawn(ctx.queue.clone(), &config.consumer_group, processor).await?)
    };

    Ok((services, worker))
}
