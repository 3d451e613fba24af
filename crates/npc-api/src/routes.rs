//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    close_conversation, conversation, conversation_complete, conversation_history, health, index,
    list_conversations, reset_conversation,
};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Game page
        .route("/", get(index))
        // Conversation endpoints
        .route("/conversation", post(conversation).get(list_conversations))
        .route("/conversation/complete", post(conversation_complete))
        .route(
            "/conversation/{npc_name}",
            get(conversation_history).delete(close_conversation),
        )
        .route("/conversation/{npc_name}/reset", post(reset_conversation))
}
