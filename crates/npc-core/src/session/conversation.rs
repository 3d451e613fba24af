//! Per-character conversation history

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::{Message, Role};
use crate::prompt::PromptTemplates;

/// Number of system messages every history starts with
pub const SEED_LEN: usize = 2;

/// One character's dialogue history.
///
/// The history always starts with the general prompt followed by the
/// character's system prompt. Everything after those two entries is the
/// exchange with the player, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationManager {
    npc_name: String,
    templates: PromptTemplates,
    history: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationManager {
    /// Create a conversation seeded with the general and system prompts
    pub fn new(npc_name: impl Into<String>, templates: &PromptTemplates, system_prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            npc_name: npc_name.into(),
            templates: templates.clone(),
            history: templates.seed(system_prompt),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn npc_name(&self) -> &str {
        &self.npc_name
    }

    /// Append a message
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(Message::new(role, content));
        self.updated_at = Utc::now();
    }

    /// The full conversation, oldest first
    pub fn get_history(&self) -> &[Message] {
        &self.history
    }

    /// Start over with the given system prompt
    pub fn reset(&mut self, system_prompt: &str) {
        self.history = self.templates.seed(system_prompt);
        self.updated_at = Utc::now();
    }

    /// The character's current system prompt
    pub fn system_prompt(&self) -> &str {
        &self.history[1].content
    }

    /// Number of messages, including the two system prompts
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Always false; a conversation holds at least its system prompts
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Number of player messages so far
    pub fn turn_count(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }

    /// Drop every message after the first `len`, never touching the system prompts
    pub fn truncate(&mut self, len: usize) {
        let len = len.max(SEED_LEN);
        if len < self.history.len() {
            self.history.truncate(len);
            self.updated_at = Utc::now();
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Copy of the conversation for callers outside the store
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            npc_name: self.npc_name.clone(),
            messages: self.history.clone(),
            turns: self.turn_count(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time copy of a conversation
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub npc_name: String,
    pub messages: Vec<Message>,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ConversationManager {
        ConversationManager::new("guard", &PromptTemplates::new("general"), "You are a stern gate guard.")
    }

    #[test]
    fn test_new_conversation_is_seeded() {
        let conversation = guard();
        assert_eq!(conversation.npc_name(), "guard");
        assert_eq!(
            conversation.get_history(),
            &[
                Message::system("general"),
                Message::system("You are a stern gate guard."),
            ]
        );
        assert_eq!(conversation.turn_count(), 0);
        assert!(!conversation.is_empty());
    }

    #[test]
    fn test_add_message_appends_in_order() {
        let mut conversation = guard();
        conversation.add_message(Role::User, "Let me in.");
        conversation.add_message(Role::Assistant, "{\"murder\": false} No.");
        conversation.add_message(Role::User, "Let me in.");

        let history = conversation.get_history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[2], Message::user("Let me in."));
        assert_eq!(history[3], Message::assistant("{\"murder\": false} No."));
        // no deduplication
        assert_eq!(history[4], Message::user("Let me in."));
        assert_eq!(conversation.turn_count(), 2);
    }

    #[test]
    fn test_reset_replaces_system_prompt() {
        let mut conversation = guard();
        conversation.add_message(Role::User, "Hello");
        conversation.add_message(Role::Assistant, "Move along.");

        conversation.reset("You are a sleepy gate guard.");

        assert_eq!(conversation.len(), SEED_LEN);
        assert_eq!(conversation.get_history()[0], Message::system("general"));
        assert_eq!(conversation.system_prompt(), "You are a sleepy gate guard.");
    }

    #[test]
    fn test_truncate_keeps_system_prompts() {
        let mut conversation = guard();
        conversation.add_message(Role::User, "Hello");
        conversation.add_message(Role::Assistant, "Move along.");

        conversation.truncate(3);
        assert_eq!(conversation.len(), 3);

        conversation.truncate(0);
        assert_eq!(conversation.len(), SEED_LEN);
        assert_eq!(conversation.system_prompt(), "You are a stern gate guard.");
    }

    #[test]
    fn test_snapshot() {
        let mut conversation = guard();
        conversation.add_message(Role::User, "Hello");

        let snapshot = conversation.snapshot();
        assert_eq!(snapshot.npc_name, "guard");
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.turns, 1);
        assert!(snapshot.updated_at >= snapshot.created_at);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["messages"][2]["role"], "user");
    }
}
