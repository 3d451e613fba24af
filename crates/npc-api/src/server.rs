//! HTTP API Server
//!
//! Starts and manages the axum-based HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use npc_core::{ApiConfig, ConversationService};

use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversationService>,
    pub index_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(service: Arc<ConversationService>, config: &ApiConfig) -> Self {
        Self {
            service,
            index_path: Arc::new(PathBuf::from(&config.index_path)),
        }
    }
}

/// Build the application router with static files, CORS and request tracing
pub fn app(state: AppState, static_dir: &str) -> Router {
    Router::new()
        .merge(routes())
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server and run until `shutdown` resolves
pub async fn start_server<F>(
    config: &ApiConfig,
    service: Arc<ConversationService>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", config.bind_addr(), e))?;

    let state = AppState::new(service, config);
    let app = app(state, &config.static_dir);

    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
