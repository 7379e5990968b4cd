//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/index.sqlite"
//!
//! [storage]
//! root = "./wiki"
//!
//! [chunking]
//! method = "fixed-size"
//! max_chunk_size = 1000
//! overlap = 100
//!
//! [queue]
//! parallelism = 4
//! max_attempts = 3
//!
//! [[embedding.models]]
//! id = "m1"
//! provider = "hash"
//! dims = 64
//!
//! [identity.groups]
//! editors = ["alice", "bob"]
//!
//! [[collections]]
//! name = "Docs"
//! embedding_model = "m1"
//! [collections.acl.use]
//! groups = ["editors"]
//! [collections.acl.admin]
//! users = ["root"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use wiki_index_core::acl::CollectionAcl;
use wiki_index_core::chunk::ChunkingPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Persistent index store; the in-memory store is used when absent.
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

/// Defaults for collections that do not set their own chunking policy.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn policy(&self) -> ChunkingPolicy {
        ChunkingPolicy::new(&self.method, self.max_chunk_size, self.overlap)
    }
}

fn default_method() -> String {
    "fixed-size".to_string()
}
fn default_max_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Distinct documents processed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Total attempts per document before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout applied to every embed and store call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl QueueConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn default_parallelism() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub models: Vec<EmbeddingModelConfig>,
}

/// One entry of the embedding model table.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingModelConfig {
    /// Identifier collections refer to (`embedding_model = "..."`).
    pub id: String,
    /// `hash`, `openai`, `ollama`, or `local`.
    pub provider: String,
    /// Provider-side model name; defaults to `id`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl EmbeddingModelConfig {
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }
}

fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    /// Group name → member user ids.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

/// A collection created at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    pub name: String,
    pub embedding_model: String,
    #[serde(default)]
    pub chunking_method: Option<String>,
    #[serde(default)]
    pub max_chunk_size: Option<usize>,
    #[serde(default)]
    pub overlap: Option<usize>,
    #[serde(default)]
    pub acl: CollectionAcl,
}

impl CollectionConfig {
    /// Chunking policy with unset fields taken from `defaults`.
    pub fn policy(&self, defaults: &ChunkingConfig) -> ChunkingPolicy {
        ChunkingPolicy::new(
            self.chunking_method.as_deref().unwrap_or(&defaults.method),
            self.max_chunk_size.unwrap_or(defaults.max_chunk_size),
            self.overlap.unwrap_or(defaults.overlap),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    /// Per-target overrides, e.g. `wiki_index::queue = "debug"`.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking defaults
    config
        .chunking
        .policy()
        .validate()
        .context("invalid [chunking] defaults")?;

    // Validate queue
    if config.queue.parallelism == 0 {
        bail!("queue.parallelism must be > 0");
    }
    if config.queue.max_attempts == 0 {
        bail!("queue.max_attempts must be > 0");
    }
    if config.queue.call_timeout_secs == 0 {
        bail!("queue.call_timeout_secs must be > 0");
    }
    if config.queue.initial_backoff_ms > config.queue.max_backoff_ms {
        bail!("queue.initial_backoff_ms must not exceed queue.max_backoff_ms");
    }

    // Validate embedding model table
    let mut ids = HashSet::new();
    for model in &config.embedding.models {
        if !ids.insert(model.id.as_str()) {
            bail!("duplicate embedding model id: '{}'", model.id);
        }
        match model.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider for model '{}': '{}'. Must be hash, openai, ollama, or local.",
                model.id,
                other
            ),
        }
        if model.provider != "local" && model.dims.unwrap_or(0) == 0 {
            bail!("embedding model '{}': dims must be > 0", model.id);
        }
    }

    Ok(config)
}
