//! Health and status endpoints.

use appwatch_common::{LoopPhase, TopicStatus};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::status::StatusBoard;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the process running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    topics: usize,
}

/// Readiness check: 503 while any topic is backing off from store errors
pub async fn ready_check(
    State(board): State<StatusBoard>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let topics = board.snapshot().await;
    let degraded = topics
        .iter()
        .any(|t| matches!(t.phase, LoopPhase::BackingOff | LoopPhase::Stopped));

    if degraded || topics.is_empty() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        topics: topics.len(),
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    version: &'static str,
    topics: Vec<TopicStatus>,
}

/// Per-topic watch status
pub async fn status(State(board): State<StatusBoard>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        topics: board.snapshot().await,
    })
}
