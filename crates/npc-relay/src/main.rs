//! npc-relay: NPC conversation relay server
//!
//! Usage:
//!   npc-relay                    - Start the HTTP server
//!   npc-relay --config <path>    - Start with a specific config file
//!   npc-relay --help             - Show help

use std::sync::Arc;

use npc_core::{Config, ConversationService, OllamaClient};
use tracing_subscriber::EnvFilter;

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Options {
    config_path: Option<String>,
    no_warmup: bool,
}

/// Run mode
#[derive(Debug, PartialEq)]
enum RunMode {
    Server(Options),
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = match parse_args(std::env::args().skip(1))? {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("npc-relay {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server(options) => options,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let mut config = match &options.config_path {
        Some(path) => Config::from_toml_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    if options.no_warmup {
        config.llm.warmup = false;
    }

    tracing::info!("Starting npc-relay...");
    tracing::info!("Backend: {} (model: {})", config.llm.base_url, config.llm.model);

    run_server(config).await
}

/// Parse command line arguments
fn parse_args<I>(args: I) -> anyhow::Result<RunMode>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                options.config_path = Some(path);
            }
            "--no-warmup" => options.no_warmup = true,
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(RunMode::Server(options))
}

/// Print help message
fn print_help() {
    println!("npc-relay - NPC conversation relay");
    println!();
    println!("Usage:");
    println!("  npc-relay                  Start the HTTP server");
    println!("  npc-relay --config <path>  Read settings from <path> instead of ./npc-relay.toml");
    println!("  npc-relay --no-warmup      Skip preloading the model");
    println!("  npc-relay --help           Show this help message");
    println!("  npc-relay --version        Show version");
    println!();
    println!("Environment Variables:");
    println!("  LLM_BASE_URL         Ollama endpoint (default: http://localhost:11434)");
    println!("  LLM_MODEL            Model name (default: llama3)");
    println!("  LLM_TIMEOUT_SECS     Backend read timeout (default: 120)");
    println!("  LLM_WARMUP           Preload the model at start-up (default: true)");
    println!("  API_HOST             Bind address (default: 0.0.0.0)");
    println!("  API_PORT             HTTP port (default: 8000)");
    println!("  STATIC_DIR           Directory served under /static (default: static)");
    println!("  INDEX_PATH           Page served at / (default: index.html)");
    println!("  MAX_SESSIONS         Keep at most this many conversations (default: unlimited)");
    println!("  GENERAL_PROMPT_PATH  File replacing the built-in general prompt");
    println!("  RUST_LOG             Log filter (default: info)");
}

/// Run server mode
async fn run_server(config: Config) -> anyhow::Result<()> {
    let client = OllamaClient::new(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to create backend client: {}", e))?;

    if config.llm.warmup {
        // a cold backend is not fatal; the first request will load the model
        if let Err(e) = client.warm_up(&config.llm.model).await {
            tracing::warn!("Model warm-up failed: {}", e);
        } else {
            tracing::info!("Model {} loaded", config.llm.model);
        }
    }

    let service = ConversationService::from_config(&config, Arc::new(client))
        .map_err(|e| anyhow::anyhow!("Failed to create conversation service: {}", e))?;
    let service = Arc::new(service);

    if let Some(max) = config.sessions.max_sessions {
        tracing::info!("Keeping at most {} conversations", max);
    }

    tracing::info!("npc-relay initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    npc_api::start_server(&config.api, service, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args_starts_server() {
        assert_eq!(parse_args(args(&[])).unwrap(), RunMode::Server(Options::default()));
    }

    #[test]
    fn test_config_and_warmup_flags() {
        let mode = parse_args(args(&["--config", "prod.toml", "--no-warmup"])).unwrap();
        assert_eq!(
            mode,
            RunMode::Server(Options {
                config_path: Some("prod.toml".to_string()),
                no_warmup: true,
            })
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse_args(args(&["-h"])).unwrap(), RunMode::Help);
        assert_eq!(parse_args(args(&["--version"])).unwrap(), RunMode::Version);
    }

    #[test]
    fn test_bad_args() {
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--cli"])).is_err());
    }
}
