use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use taskpipe_infra::TaskStore;

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `{ totalTasks, averageProcessingTimeMs }` over completed tasks.
pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store.completion_metrics().await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
