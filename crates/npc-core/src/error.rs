//! Error types for npc-core

use thiserror::Error;

/// Main error type for npc-core
#[derive(Error, Debug)]
pub enum Error {
    /// An unknown character was addressed without a system prompt
    #[error("No active conversation for NPC {npc_name}. System prompt is required.")]
    MissingSystemPrompt { npc_name: String },

    /// No session exists for the character
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The language-model backend could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The language-model backend answered with an error or a malformed reply
    #[error("Backend error: {0}")]
    BackendFailure(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a `MissingSystemPrompt` error for a character
    pub fn missing_system_prompt(npc_name: impl Into<String>) -> Self {
        Self::MissingSystemPrompt {
            npc_name: npc_name.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingSystemPrompt { .. } | Self::SessionNotFound(_))
    }

    /// Whether the error originated in the language-model backend
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::BackendFailure(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::BackendUnavailable(e.to_string())
        } else {
            Self::BackendFailure(e.to_string())
        }
    }
}

/// Result type alias for npc-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_system_prompt_names_character() {
        let err = Error::missing_system_prompt("ghost");
        assert_eq!(
            err.to_string(),
            "No active conversation for NPC ghost. System prompt is required."
        );
        assert!(err.is_client_error());
        assert!(!err.is_backend_error());
    }

    #[test]
    fn test_backend_errors_are_not_client_errors() {
        let err = Error::BackendFailure("model not found".to_string());
        assert!(err.is_backend_error());
        assert!(!err.is_client_error());
    }
}
