//! Local inference through fastembed.
//!
//! The model is downloaded from Hugging Face on first use and cached;
//! later calls run offline. Inference is CPU-bound and runs on the
//! blocking pool.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use wiki_index_core::embedding::{check_dims, EmbeddingClient};
use wiki_index_core::{IndexError, IndexResult};

use crate::config::EmbeddingModelConfig;

pub struct LocalClient {
    model_name: String,
    dims: usize,
    kind: fastembed::EmbeddingModel,
    model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalClient {
    pub fn new(config: &EmbeddingModelConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (kind, default_dims) = fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            kind,
            model: Arc::new(Mutex::new(None)),
        })
    }
}

fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel::*;
    match name {
        "all-minilm-l6-v2" => Ok((AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((MultilingualE5Base, 768)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

#[async_trait]
impl EmbeddingClient for LocalClient {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let slot = Arc::clone(&self.model);
        let kind = self.kind.clone();
        let text = text.to_string();

        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| IndexError::embedding("local model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| {
                    IndexError::Embedding(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(vec![text], None)
                    .map_err(|e| IndexError::Embedding(format!("Local embedding failed: {}", e))),
                None => Err(IndexError::embedding("local model unavailable")),
            }
        })
        .await
        .map_err(IndexError::embedding)??;

        let vector = vectors
            .pop()
            .ok_or_else(|| IndexError::embedding("local model returned no embedding"))?;
        check_dims(self.dims, &vector)?;
        Ok(vector)
    }
}
