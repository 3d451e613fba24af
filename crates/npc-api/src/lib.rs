//! npc-api: HTTP API for the NPC conversation relay
//!
//! Exposes conversations over JSON and server-sent events, plus the game's
//! page and static assets. Built with axum.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{app, start_server, AppState};
