//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. Environment variables
//! 2. `npc-relay.toml` (or the file passed on the command line)
//! 3. Defaults
//!
//! `${VAR_NAME}` inside the config file is replaced with the environment
//! variable's value.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "npc-relay.toml";

/// Language-model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum idle time between reads from the backend, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Preload the model at start-up
    #[serde(default = "default_true")]
    pub warmup: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            warmup: true,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port for HTTP server
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Page served at `/`
    #[serde(default = "default_index_path")]
    pub index_path: String,
}

impl ApiConfig {
    /// Socket address string for the HTTP server
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            static_dir: default_static_dir(),
            index_path: default_index_path(),
        }
    }
}

/// Session store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of live conversations; least recently used are evicted.
    /// `None` keeps every conversation for the life of the process.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

/// Prompt configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// File whose contents replace the built-in general prompt
    #[serde(default)]
    pub general_path: Option<String>,
}

/// Main configuration for npc-relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub prompt: PromptConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_index_path() -> String {
    "index.html".to_string()
}

impl Config {
    /// Replace `${VAR_NAME}` with the environment variable's value.
    ///
    /// Unknown variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // consume '{'

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// Parse configuration from TOML text without consulting the environment
    /// (apart from `${VAR}` expansion)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded_content = Self::expand_env_vars(content);
        toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load from the default location.
    ///
    /// Uses `./npc-relay.toml` when it exists, otherwise defaults plus
    /// environment variables.
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Override settings with environment variables
    fn apply_env_overrides(&mut self) {
        // LLM_BASE_URL wins over OLLAMA_HOST
        if let Some(base_url) = non_empty_var("LLM_BASE_URL").or_else(|| non_empty_var("OLLAMA_HOST")) {
            self.llm.base_url = base_url;
        }
        if let Some(model) = non_empty_var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(secs) = non_empty_var("LLM_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.llm.timeout_secs = secs;
        }
        if let Some(warmup) = non_empty_var("LLM_WARMUP") {
            self.llm.warmup = warmup.to_lowercase() != "false";
        }

        if let Some(host) = non_empty_var("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = non_empty_var("API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }
        if let Some(dir) = non_empty_var("STATIC_DIR") {
            self.api.static_dir = dir;
        }
        if let Some(path) = non_empty_var("INDEX_PATH") {
            self.api.index_path = path;
        }

        if let Some(max) = non_empty_var("MAX_SESSIONS").and_then(|m| m.parse().ok()) {
            self.sessions.max_sessions = Some(max);
        }

        if let Some(path) = non_empty_var("GENERAL_PROMPT_PATH") {
            self.prompt.general_path = Some(path);
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.timeout_secs, 120);
        assert!(config.warmup);
    }

    #[test]
    fn test_api_config_default() {
        let config = ApiConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.static_dir, "static");
        assert_eq!(config.index_path, "index.html");
    }

    #[test]
    fn test_session_config_default_is_unbounded() {
        assert!(SessionConfig::default().max_sessions.is_none());
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("NPC_RELAY_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${NPC_RELAY_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${NPC_RELAY_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("NPC_RELAY_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here $HOME"), "no_vars_here $HOME");
    }

    #[test]
    fn test_expand_env_vars_empty_name() {
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[llm]
base_url = "http://gpu-box:11434"
model = "llama3:70b"
timeout_secs = 30
warmup = false

[api]
host = "127.0.0.1"
port = 8080
static_dir = "assets"

[sessions]
max_sessions = 64

[prompt]
general_path = "prompts/eldoria.txt"
"#;

        let config = Config::from_toml_str(toml_content).unwrap();
        assert_eq!(config.llm.base_url, "http://gpu-box:11434");
        assert_eq!(config.llm.model, "llama3:70b");
        assert_eq!(config.llm.timeout_secs, 30);
        assert!(!config.llm.warmup);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.static_dir, "assets");
        // unspecified keys keep their defaults
        assert_eq!(config.api.index_path, "index.html");
        assert_eq!(config.sessions.max_sessions, Some(64));
        assert_eq!(config.prompt.general_path.as_deref(), Some("prompts/eldoria.txt"));
        assert_eq!(config.api.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config = Config::from_toml_str("[llm]\nmodel = \"mistral\"\n").unwrap();
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.api.port, 8000);
        assert!(config.sessions.max_sessions.is_none());
    }

    #[test]
    fn test_toml_invalid_is_config_error() {
        let err = Config::from_toml_str("[llm\nmodel = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nstatic_dir = \"public\"").unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.api.static_dir, "public");
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = Config::from_toml_file("/nonexistent/npc-relay.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
