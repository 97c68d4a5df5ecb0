//! TOML configuration.
//!
//! One file drives every command: where the corpus lives, where the vector
//! store is persisted, how documents are chunked, which embedding backend is
//! loaded, and where the daemon and the MCP adapter meet. See
//! `config/archive.example.toml` for a complete example.
//!
//! Only `[corpus]` and `[store]` are required; every other section falls back
//! to the archive's usual settings (2000-character chunks with 200 characters
//! of overlap, `all-minilm-l6-v2`, port 8766).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::service::Normalization;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// Location and selection rules for the documents to index.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "conversation_chunks".to_string()
}

/// Sliding-window sizes, measured in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_results")]
    pub default_results: usize,
    #[serde(default)]
    pub normalization: Normalization,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_results: default_results(),
            normalization: Normalization::default(),
        }
    }
}

fn default_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8766".to_string()
}

/// Settings for the MCP tool adapter's calls into the daemon.
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_stats_timeout")]
    pub stats_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            max_results: default_max_results(),
            search_timeout_secs: default_search_timeout(),
            stats_timeout_secs: default_stats_timeout(),
        }
    }
}

fn default_daemon_url() -> String {
    "http://127.0.0.1:8766".to_string()
}
fn default_max_results() -> usize {
    20
}
fn default_search_timeout() -> u64 {
    30
}
fn default_stats_timeout() -> u64 {
    10
}

impl EmbeddingConfig {
    /// Providers that talk to a remote service need the model and its
    /// dimensionality spelled out.
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking: a non-positive step would never terminate
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hash.",
            other
        ),
    }

    if config.embedding.is_remote() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.retrieval.default_results < 1 {
        bail!("retrieval.default_results must be >= 1");
    }

    if config.adapter.max_results < 1 {
        bail!("adapter.max_results must be >= 1");
    }
    if config.adapter.search_timeout_secs == 0 || config.adapter.stats_timeout_secs == 0 {
        bail!("adapter timeouts must be > 0");
    }

    Ok(())
}
