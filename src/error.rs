use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::hub::ConnectionId;

/// Unified error type for the Flappyo service
#[derive(Error, Debug)]
pub enum FlappyoError {
    // Hub errors
    #[error("Hub is not running")]
    HubClosed,

    #[error("Outbox of {id} is closed")]
    OutboxClosed { id: ConnectionId },

    #[error("Outbox of {id} stayed full for {waited:?}")]
    OutboxTimeout { id: ConnectionId, waited: Duration },

    // Wire errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Flappyo operations
pub type Result<T> = std::result::Result<T, FlappyoError>;

impl FlappyoError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            FlappyoError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 503 Service Unavailable
            FlappyoError::HubClosed => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            FlappyoError::OutboxClosed { .. }
            | FlappyoError::OutboxTimeout { .. }
            | FlappyoError::Serialization(_)
            | FlappyoError::Transport(_)
            | FlappyoError::Io(_)
            | FlappyoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for FlappyoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
