//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: builds the pipeline services from configuration
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .merge(routes::tasks::router())
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
