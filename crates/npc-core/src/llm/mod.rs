//! Language-model backend client and types

mod client;
mod types;

pub use client::{decode_chat_stream, ChatBackend, FragmentStream, LineDecoder, OllamaClient};
pub use types::*;
