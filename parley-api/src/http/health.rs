//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub rooms: usize,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus a glance at relay load
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.relay.registry;
    Json(HealthResponse {
        status: "ok",
        sessions: registry.session_count(),
        rooms: registry.room_count(),
    })
}
