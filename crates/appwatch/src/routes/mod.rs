//! HTTP routes for the status endpoint.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::status::StatusBoard;

mod health;

/// Create the status router
pub fn create_router(board: StatusBoard) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/status", get(health::status))
        .layer(TraceLayer::new_for_http())
        .with_state(board)
}
