//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/autodidact.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [generation]
//! provider = "auto"   # auto | mock | gemini
//! model = "gemini-1.5-flash"
//! ```
//!
//! Only `[db]` and `[server]` are required; `[generation]` and `[ingest]`
//! fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Longest text, in characters, sent for summarization.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "auto".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_input_chars() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl GenerationConfig {
    /// The API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    match config.generation.provider.as_str() {
        "auto" | "mock" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be auto, mock, or gemini.",
            other
        ),
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    if config.generation.max_input_chars == 0 {
        anyhow::bail!("generation.max_input_chars must be > 0");
    }

    if config.ingest.fetch_timeout_secs == 0 {
        anyhow::bail!("ingest.fetch_timeout_secs must be > 0");
    }

    Ok(config)
}
