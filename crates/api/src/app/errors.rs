use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use taskpipe_infra::{LookupError, SubmitError, TaskStoreError};

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Store(e) => store_error_to_response(e),
    }
}

pub fn lookup_error_to_response(err: LookupError) -> axum::response::Response {
    match err {
        LookupError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: TaskStoreError) -> axum::response::Response {
    error!(error = %err, "task store request failed");
    match err {
        TaskStoreError::AlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("task {id} already exists"),
        ),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            other.to_string(),
        ),
    }
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
