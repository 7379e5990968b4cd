//! Embedding clients and the embedding model table.
//!
//! Concrete [`EmbeddingClient`] implementations:
//! - **[`HashEmbeddingClient`]**: deterministic feature hashing; offline, no model download.
//! - **[`OpenAiClient`]**: `POST /v1/embeddings` on the OpenAI API.
//! - **[`OllamaClient`]**: `POST /api/embed` on a local Ollama instance.
//! - **`LocalClient`**: fastembed inference (feature `local-embeddings-fastembed`).
//!
//! Clients make exactly one request per call. Retries, backoff, and the
//! per-call timeout budget belong to the indexing pipeline, which retries
//! a whole document attempt rather than single chunks.
//!
//! Collections name their model by id; [`EmbeddingModels`] resolves those
//! ids and rejects unknown ones with a configuration error.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use wiki_index_core::embedding::{check_dims, EmbeddingClient};
use wiki_index_core::{IndexError, IndexResult};

use crate::config::{EmbeddingConfig, EmbeddingModelConfig};

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalClient;

// ============ Model table ============

/// A known embedding model, as listed to administrators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub model: String,
    pub dims: usize,
}

/// Embedding model id → client.
#[derive(Clone, Default)]
pub struct EmbeddingModels {
    clients: BTreeMap<String, Arc<dyn EmbeddingClient>>,
}

impl EmbeddingModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every client listed in `[[embedding.models]]`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut models = Self::new();
        for entry in &config.models {
            models.insert(&entry.id, create_client(entry)?);
        }
        Ok(models)
    }

    pub fn insert(&mut self, id: &str, client: Arc<dyn EmbeddingClient>) {
        self.clients.insert(id.to_string(), client);
    }

    pub fn with(mut self, id: &str, client: Arc<dyn EmbeddingClient>) -> Self {
        self.insert(id, client);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Resolve a model id, failing with a configuration error if unknown.
    pub fn get(&self, id: &str) -> IndexResult<Arc<dyn EmbeddingClient>> {
        self.clients.get(id).cloned().ok_or_else(|| {
            IndexError::Configuration(format!(
                "unknown embedding model '{}'; known models: {}",
                id,
                self.clients.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.clients
            .iter()
            .map(|(id, client)| ModelInfo {
                id: id.clone(),
                model: client.model_name().to_string(),
                dims: client.dims(),
            })
            .collect()
    }
}

/// Create the client for one model table entry.
///
/// | `provider` | Client |
/// |------------|--------|
/// | `"hash"` | [`HashEmbeddingClient`] |
/// | `"openai"` | [`OpenAiClient`] |
/// | `"ollama"` | [`OllamaClient`] |
/// | `"local"` | `LocalClient` (requires `local-embeddings-fastembed`) |
pub fn create_client(config: &EmbeddingModelConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbeddingClient::new(
            config.model_name(),
            required_dims(config)?,
        ))),
        "openai" => Ok(Arc::new(OpenAiClient::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaClient::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalClient::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_dims(config: &EmbeddingModelConfig) -> Result<usize> {
    match config.dims {
        Some(d) if d > 0 => Ok(d),
        _ => bail!("embedding model '{}': dims must be > 0", config.id),
    }
}

// ============ Hash Client ============

/// Deterministic embedding by feature hashing.
///
/// Each lowercase word is hashed with SHA-256 into one of `dims` buckets
/// with a sign bit; the result is L2-normalized. Texts sharing words get
/// similar vectors, which is enough for offline use and tests.
pub struct HashEmbeddingClient {
    model: String,
    dims: usize,
}

impl HashEmbeddingClient {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return vector;
        }
        for word in text.split_whitespace() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

// ============ OpenAI Client ============

/// Embedding client for the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiClient {
    model: String,
    dims: usize,
    api_key: String,
    url: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &EmbeddingModelConfig) -> Result<Self> {
        let dims = required_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model_name().to_string(),
            dims,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            http,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(IndexError::embedding)?;
        let json = read_json(response, "OpenAI").await?;
        let vector = parse_openai_response(&json)?;
        check_dims(self.dims, &vector)?;
        Ok(vector)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> IndexResult<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| IndexError::embedding("Invalid OpenAI response: missing embedding"))?;
    Ok(to_f32_vec(embedding))
}

// ============ Ollama Client ============

/// Embedding client for a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaClient {
    model: String,
    dims: usize,
    url: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingModelConfig) -> Result<Self> {
        let dims = required_dims(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model_name().to_string(),
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            http,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response = self
            .http
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                IndexError::Embedding(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;
        let json = read_json(response, "Ollama").await?;
        let vector = parse_ollama_response(&json)?;
        check_dims(self.dims, &vector)?;
        Ok(vector)
    }
}

/// Extract `embeddings[0]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> IndexResult<Vec<f32>> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.get(0))
        .and_then(|e| e.as_array())
        .ok_or_else(|| IndexError::embedding("Invalid Ollama response: missing embeddings array"))?;
    Ok(to_f32_vec(embedding))
}

async fn read_json(response: reqwest::Response, api: &str) -> IndexResult<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(IndexError::Embedding(format!(
            "{} API error {}: {}",
            api, status, body_text
        )));
    }
    response.json().await.map_err(IndexError::embedding)
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}
