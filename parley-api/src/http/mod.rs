// Module: http
// WebSocket relay endpoint plus the REST routes around it

pub mod error;
pub mod health;
pub mod middleware;
pub mod rooms;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::RelayContext;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayContext,
    /// Largest WebSocket message accepted from a client
    pub max_frame_bytes: usize,
    /// Page size for history requests without `limit`
    pub history_limit: i64,
}

impl AppState {
    #[must_use]
    pub fn new(relay: RelayContext, max_frame_bytes: usize, history_limit: i64) -> Self {
        Self {
            relay,
            max_frame_bytes,
            history_limit,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/{room_id}/messages", get(rooms::list_messages))
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
