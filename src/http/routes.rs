use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Conversation control
        .route("/conversation/start", post(handlers::start_conversation))
        .route("/conversation/stop", post(handlers::stop_conversation))
        .route("/conversation/toggle", post(handlers::toggle_conversation))
        // Read-only views for the UI
        .route("/conversation/state", get(handlers::get_state))
        .route("/conversation/status", get(handlers::get_status))
        .route("/conversation/transcript", get(handlers::get_transcript))
        // The viewer UI runs in a browser
        .layer(CorsLayer::permissive())
        // Tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
