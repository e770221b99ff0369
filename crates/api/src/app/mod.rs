//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: collaborator wiring from configuration
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: response payloads
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let body_limit = services.max_upload_bytes;

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/videos", routes::videos::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}
