use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use taskpipe_core::TaskId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/:id", get(get_task))
}

pub async fn create_task(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateTaskRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    let new_task = match body.validate() {
        Ok(task) => task,
        Err(problems) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                problems.join("; "),
            );
        }
    };

    match services
        .submission
        .create(new_task.payload, new_task.priority)
        .await
    {
        Ok(submitted) => (StatusCode::CREATED, Json(submitted)).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    // An id that cannot be a task id names no task.
    let Ok(id) = id.parse::<TaskId>() else {
        return errors::not_found("Task not found");
    };

    match services.lookup.find_by_id(id).await {
        Ok(Some(found)) => Json(found).into_response(),
        Ok(None) => errors::not_found("Task not found"),
        Err(e) => errors::lookup_error_to_response(e),
    }
}
