//! Session management module
//!
//! Keeps one conversation per character for the life of the process.

mod conversation;
mod store;

pub use conversation::{ConversationManager, ConversationSnapshot, SEED_LEN};
pub use store::{SessionHandle, SessionStore};
