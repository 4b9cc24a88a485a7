//! Standalone processor: consumes `tasks-input` until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use taskpipe_core::ReverseWithLength;
use taskpipe_infra::{ProcessorWorker, TaskContext, TaskProcessor, TaskpipeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskpipe_observability::init();

    let config = TaskpipeConfig::from_env().context("invalid configuration")?;
    if !config.use_persistent_stores {
        tracing::warn!(
            "USE_PERSISTENT_STORES is false; this worker only sees its own in-memory queue"
        );
    }

    let ctx = TaskContext::from_config(&config)
        .await
        .context("failed to connect backing services")?;

    let processor = TaskProcessor::new(&ctx, Arc::new(ReverseWithLength));
    let worker = ProcessorWorker::spawn(ctx.queue.clone(), &config.consumer_group, processor)
        .await
        .context("failed to subscribe to tasks-input")?;

    tracing::info!("processor worker started");

    taskpipe_api::shutdown_signal().await;
    worker.shutdown().await;

    tracing::info!("processor worker stopped");
    Ok(())
}
