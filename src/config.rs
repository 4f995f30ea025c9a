use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FamiliarConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
    /// Shared key required on every HTTP route when set.
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local` (ONNX Runtime) or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// How vector candidates and full-text candidates are merged by hybrid search.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HybridPolicy {
    /// Only observations found by both searches are ranked.
    Intersection,
    /// Either search suffices; a missing signal contributes nothing to the score.
    Union,
    /// Reciprocal Rank Fusion over both ranked lists.
    Rrf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub default_probe: usize,
    pub hybrid_limit: usize,
    pub hybrid_policy: HybridPolicy,
    pub text_weight: f64,
    pub rrf_k: usize,
    pub chat_search_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            api_key: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_familiar_dir()
            .join("familiar.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_familiar_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            default_probe: 5,
            hybrid_limit: 20,
            hybrid_policy: HybridPolicy::Intersection,
            text_weight: 0.5,
            rrf_k: 60,
            chat_search_limit: 10,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            poll_interval_secs: 30,
            batch_size: 32,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Returns `~/.familiar/`, or `./.familiar/` when no home directory is known.
pub fn default_familiar_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".familiar")
}

/// Returns the default config file path: `~/.familiar/config.toml`
pub fn default_config_path() -> PathBuf {
    default_familiar_dir().join("config.toml")
}

impl FamiliarConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            FamiliarConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// `FAMILIAR_DB`, `FAMILIAR_LOG_LEVEL`, `FAMILIAR_API_KEY`, `OPENAI_API_KEY`,
    /// `OPENAI_BASE_URL`.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FAMILIAR_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("FAMILIAR_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("FAMILIAR_API_KEY") {
            self.server.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            self.embedding.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OPENAI_BASE_URL") {
            self.embedding.api_base = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
