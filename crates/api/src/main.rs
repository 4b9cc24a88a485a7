use anyhow::Context;

use taskpipe_infra::TaskpipeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskpipe_observability::init();

    let config = TaskpipeConfig::from_env().context("invalid configuration")?;
    let (services, worker) = taskpipe_api::app::services::build_services(&config)
        .await
        .context("failed to build services")?;

    let app = taskpipe_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(taskpipe_api::shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    Ok(())
}
