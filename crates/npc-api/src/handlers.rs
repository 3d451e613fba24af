//! HTTP API handlers
//!
//! Request handlers for NPC conversations.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use npc_core::{ConversationRequest, ConversationSnapshot, RelayEvent};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Reply to a non-streaming conversation request
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Reset request payload
#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    /// New system prompt; the current one is kept when absent
    #[serde(default)]
    pub system: Option<String>,
}

/// Names of the characters with a live conversation
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<String>,
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Game page
pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    match tokio::fs::read_to_string(&*state.index_path).await {
        Ok(html) => Ok(Html(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(state.index_path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Conversation endpoint - stream the reply as server-sent events.
///
/// Every fragment is one `data` event. A backend failure ends the stream
/// with a single `error` event.
pub async fn conversation(
    State(state): State<AppState>,
    Json(req): Json<ConversationRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    debug!("Conversation request: npc={}, message={:?}", req.npc_name, req.message);

    let stream = state.service.converse_stream(&req).await?;
    let events = stream.map(|event| Ok(to_sse_event(event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Fragment(text) => Event::default().data(sse_safe(text)),
        RelayEvent::Failed(e) => Event::default().event("error").data(sse_safe(e.to_string())),
    }
}

/// SSE treats a bare CR as a line break, so it cannot appear inside a data
/// line. Line breaks of any kind are sent as `\n`.
fn sse_safe(text: String) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text
    }
}

/// Conversation endpoint - return the whole reply at once
pub async fn conversation_complete(
    State(state): State<AppState>,
    Json(req): Json<ConversationRequest>,
) -> Result<Json<MessageResponse>> {
    debug!("Complete conversation request: npc={}", req.npc_name);

    let message = state.service.converse(&req).await?;
    Ok(Json(MessageResponse { message }))
}

/// List live conversations
pub async fn list_conversations(State(state): State<AppState>) -> Json<ConversationListResponse> {
    Json(ConversationListResponse {
        conversations: state.service.sessions().npc_names().await,
    })
}

/// Get a character's conversation
pub async fn conversation_history(
    State(state): State<AppState>,
    Path(npc_name): Path<String>,
) -> Result<Json<ConversationSnapshot>> {
    let snapshot = state.service.history(&npc_name).await?;
    Ok(Json(snapshot))
}

/// Restart a character's conversation.
///
/// The body is optional; without one the current system prompt is kept.
pub async fn reset_conversation(
    State(state): State<AppState>,
    Path(npc_name): Path<String>,
    body: Option<Json<ResetRequest>>,
) -> Result<Json<ConversationSnapshot>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    info!("Resetting conversation: {}", npc_name);
    let snapshot = state.service.reset(&npc_name, req.system.as_deref()).await?;
    Ok(Json(snapshot))
}

/// Close a character's conversation
pub async fn close_conversation(
    State(state): State<AppState>,
    Path(npc_name): Path<String>,
) -> Result<StatusCode> {
    info!("Closing conversation: {}", npc_name);
    state.service.close(&npc_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_safe_normalizes_carriage_returns() {
        assert_eq!(sse_safe("a\r\nb\rc\nd".to_string()), "a\nb\nc\nd");
        assert_eq!(sse_safe("plain".to_string()), "plain");
    }
}
