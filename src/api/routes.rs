//! Route definitions

use std::path::Path;

use axum::routing::get;
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the router with all routes
pub fn create_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Trigger source
        .route(
            "/flappyo",
            get(handlers::trigger::flappyo).post(handlers::trigger::flappyo),
        )
        // Transport adapter
        .route("/ws", get(websocket::notifications::notifications_ws))
        // Static assets
        .nest_service("/static", ServeDir::new(static_dir))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .with_state(state)
}
