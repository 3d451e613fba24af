//! Error types (npc-api)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// npc-api error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] npc_core::Error),
}

/// Error body, `{"detail": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(e) => match e {
                npc_core::Error::MissingSystemPrompt { .. } => StatusCode::BAD_REQUEST,
                npc_core::Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
                npc_core::Error::BackendUnavailable(_) | npc_core::Error::BackendFailure(_) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { detail: self.to_string() })).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;
