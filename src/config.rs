//! TOML configuration parsing and validation.
//!
//! Every section except `[index]` has defaults, so a minimal config only
//! needs the path to the index file:
//!
//! ```toml
//! [index]
//! path = "./public/search-index.json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Static JSON file produced by the offline indexing step.
    pub path: PathBuf,
    /// Expected length of every stored embedding.
    #[serde(default = "default_dims")]
    pub dims: usize,
}

fn default_dims() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_api_key_env() -> String {
    "OPEN_AI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Reads the API key from the configured environment variable.
    ///
    /// An empty value is treated the same as an unset one.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum hits returned by the executor.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Minimum cosine similarity for a vector candidate.
    #[serde(default = "default_similarity")]
    pub similarity: f64,
    /// Weight for semantic vs keyword: `hybrid = (1-α)*keyword + α*semantic`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            similarity: default_similarity(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_limit() -> usize {
    50
}
fn default_similarity() -> f64 {
    0.5
}
fn default_hybrid_alpha() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per key per window.
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Maximum number of tracked keys before LRU eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_rate_limit() -> u32 {
    8
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_entries() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SiteConfig {
    /// Prefix for result URLs; results link to `<base_url>/posts/<slug>`.
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// A config with every section defaulted, pointing at `index_path`.
    pub fn with_index(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                path: index_path.into(),
                dims: default_dims(),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rate_limit: RateLimitConfig::default(),
            site: SiteConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&mut config)?;
    Ok(config)
}

fn validate(config: &mut Config) -> Result<()> {
    if config.index.dims == 0 {
        anyhow::bail!("index.dims must be > 0");
    }

    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.similarity) {
        anyhow::bail!("retrieval.similarity must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    if config.rate_limit.limit < 1 {
        anyhow::bail!("rate_limit.limit must be >= 1");
    }
    if config.rate_limit.window_secs < 1 {
        anyhow::bail!("rate_limit.window_secs must be >= 1");
    }
    if config.rate_limit.max_entries < 1 {
        anyhow::bail!("rate_limit.max_entries must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    let trimmed = config.site.base_url.trim_end_matches('/').to_string();
    config.site.base_url = trimmed;

    Ok(())
}
