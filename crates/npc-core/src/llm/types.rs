//! Chat API types (Ollama wire format)

use serde::{Deserialize, Serialize};

/// Author of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request body for `POST /api/chat`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
}

/// One response object from `POST /api/chat`.
///
/// With `stream: false` the backend sends exactly one of these with
/// `done: true`. With `stream: true` it sends one per line, the last one
/// carrying `done: true` and usually an empty `content`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<ChatResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Set when the backend reports a failure in-band
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    /// Text carried by this response, empty when there is none
    pub fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: String,
}

/// Request body for `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("Hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"Hi"}"#);
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![Message::system("rules"), Message::user("hello")];
        let request = ChatRequest {
            model: "llama3",
            messages: &messages,
            stream: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "llama3");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let line = r#"{"model":"llama3","created_at":"2024-05-01T10:00:00Z","message":{"role":"assistant","content":"Hal"},"done":false}"#;
        let chunk: ChatResponse = serde_json::from_str(line).unwrap();
        assert_eq!(chunk.content(), "Hal");
        assert!(!chunk.done);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn test_final_chunk_without_message() {
        let line = r#"{"model":"llama3","done":true,"done_reason":"stop","eval_count":12}"#;
        let chunk: ChatResponse = serde_json::from_str(line).unwrap();
        assert_eq!(chunk.content(), "");
        assert!(chunk.done);
        assert_eq!(chunk.done_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_error_line_parsing() {
        let chunk: ChatResponse = serde_json::from_str(r#"{"error":"model 'llama9' not found"}"#).unwrap();
        assert_eq!(chunk.error.as_deref(), Some("model 'llama9' not found"));
    }
}
