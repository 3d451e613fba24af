//! npc-core: conversational relay core library
//!
//! Per-character conversation state, the language-model backend client and
//! the relay that streams replies while recording them in history.

pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod relay;
pub mod service;
pub mod session;

pub use config::{ApiConfig, Config, LlmConfig, PromptConfig, SessionConfig};
pub use error::{Error, Result};
pub use llm::{ChatBackend, FragmentStream, Message, OllamaClient, Role};
pub use prompt::{PromptTemplates, GENERAL_PROMPT};
pub use relay::{ChatRelay, RelayEvent, RelayState, RelayStream};
pub use service::{ConversationRequest, ConversationService};
pub use session::{ConversationManager, ConversationSnapshot, SessionHandle, SessionStore};
