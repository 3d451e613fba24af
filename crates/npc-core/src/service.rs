//! Conversation service
//!
//! The object request handlers talk to. Built once at start-up and shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::llm::ChatBackend;
use crate::prompt::PromptTemplates;
use crate::relay::{ChatRelay, RelayStream};
use crate::session::{ConversationSnapshot, SessionStore};
use crate::{Error, Result};

/// A player's message to a character
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub npc_name: String,
    pub message: String,
    /// Character system prompt; required on first contact only
    #[serde(default)]
    pub system: Option<String>,
}

impl ConversationRequest {
    pub fn new(npc_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            npc_name: npc_name.into(),
            message: message.into(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Session store plus chat relay
pub struct ConversationService {
    sessions: SessionStore,
    relay: ChatRelay,
}

impl ConversationService {
    pub fn new(sessions: SessionStore, relay: ChatRelay) -> Self {
        Self { sessions, relay }
    }

    /// Build the service from configuration around an existing backend
    pub fn from_config(config: &Config, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        let templates = PromptTemplates::load(config.prompt.general_path.as_deref())?;
        let sessions = SessionStore::with_options(templates, config.sessions.max_sessions);
        let relay = ChatRelay::new(backend, config.llm.model.clone());
        Ok(Self::new(sessions, relay))
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn relay(&self) -> &ChatRelay {
        &self.relay
    }

    /// Run a turn and return the whole reply
    pub async fn converse(&self, request: &ConversationRequest) -> Result<String> {
        debug!("Conversation request for NPC: {}", request.npc_name);
        let conversation = self
            .sessions
            .get_or_create(&request.npc_name, request.system.as_deref())
            .await?;
        self.relay.complete(&conversation, &request.message).await
    }

    /// Run a turn as a fragment stream.
    ///
    /// Session lookup happens before the stream opens, so a missing system
    /// prompt is reported here rather than as a stream event.
    pub async fn converse_stream(&self, request: &ConversationRequest) -> Result<RelayStream> {
        debug!("Streaming conversation request for NPC: {}", request.npc_name);
        let conversation = self
            .sessions
            .get_or_create(&request.npc_name, request.system.as_deref())
            .await?;
        Ok(self.relay.stream(conversation, request.message.clone()))
    }

    /// Restart a character's conversation
    pub async fn reset(&self, npc_name: &str, system_prompt: Option<&str>) -> Result<ConversationSnapshot> {
        let conversation = self.sessions.reset(npc_name, system_prompt).await?;
        let snapshot = conversation.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Copy of a character's conversation
    pub async fn history(&self, npc_name: &str) -> Result<ConversationSnapshot> {
        let conversation = self
            .sessions
            .get(npc_name)
            .await
            .ok_or_else(|| Error::SessionNotFound(npc_name.to_string()))?;
        let snapshot = conversation.lock().await.snapshot();
        Ok(snapshot)
    }

    /// End a character's conversation
    pub async fn close(&self, npc_name: &str) -> Result<()> {
        if self.sessions.remove(npc_name).await {
            Ok(())
        } else {
            Err(Error::SessionNotFound(npc_name.to_string()))
        }
    }
}
