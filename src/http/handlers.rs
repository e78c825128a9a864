use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

use super::state::AppState;
use crate::error::SessionError;
use crate::session::SessionState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /conversation/start
/// Start the live voice conversation
pub async fn start_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP request: start conversation");

    match state.engine.clone().start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ConversationResponse {
                state: state.engine.state(),
                message: "Conversation starting".to_string(),
            }),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST /conversation/stop
/// Stop the live voice conversation; always succeeds
pub async fn stop_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP request: stop conversation");

    state.engine.stop().await;
    Json(ConversationResponse {
        state: state.engine.state(),
        message: "Conversation stopped".to_string(),
    })
}

/// POST /conversation/toggle
pub async fn toggle_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP request: toggle conversation");

    match state.engine.clone().toggle().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ConversationResponse {
                state: state.engine.state(),
                message: "Conversation toggled".to_string(),
            }),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET /conversation/state
pub async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(StateResponse {
        state: state.engine.state(),
    })
}

/// GET /conversation/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.stats().await)
}

/// GET /conversation/transcript
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.transcript().await)
}

fn session_error_response(e: SessionError) -> axum::response::Response {
    match e {
        SessionError::AlreadyActive => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "A conversation is already active".to_string(),
            }),
        )
            .into_response(),
        SessionError::Device(e) => {
            error!("Device error starting conversation: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Check microphone permissions: {}", e),
                }),
            )
                .into_response()
        }
        SessionError::Open(e) => {
            error!("Failed to open live session: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Could not reach the assistant, try again: {}", e),
                }),
            )
                .into_response()
        }
    }
}
