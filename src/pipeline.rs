//! The per-document indexing pass.
//!
//! One attempt is: load content → chunk → embed every chunk → replace the
//! document's chunk set in the index store. The store write happens only
//! once every chunk has a vector, so a failed attempt leaves the previous
//! chunk set in place.
//!
//! # Failure policy
//!
//! | Error | Effect |
//! |-------|--------|
//! | retrieval | task dropped, status restored, next notification retries |
//! | embedding / store / timeout | retried with backoff up to `max_attempts` |
//! | attempts exhausted, or configuration | document marked failed with the cause |

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use wiki_index_core::embedding::check_dims;
use wiki_index_core::models::{IndexTask, IndexTaskState};
use wiki_index_core::store::{DocumentMetadata, IndexStore};
use wiki_index_core::{IndexError, IndexResult};

use crate::collection::{Collection, PassResult};
use crate::embedding::EmbeddingModels;
use crate::queue::TaskHandler;
use crate::registry::CollectionRegistry;
use crate::retry::{self, RetryPolicy};
use crate::storage::DocumentStorage;

pub struct IndexPipeline {
    registry: Arc<CollectionRegistry>,
    storage: Arc<dyn DocumentStorage>,
    store: Arc<dyn IndexStore>,
    models: Arc<EmbeddingModels>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl IndexPipeline {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        storage: Arc<dyn DocumentStorage>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        let ctx = registry.context().clone();
        Self {
            registry,
            storage,
            store: ctx.store,
            models: ctx.models,
            retry,
            call_timeout,
        }
    }

    /// Run a dequeued task to completion, retries included.
    pub async fn process(&self, task: &IndexTask) {
        let name = task.collection.as_str();
        let id = task.document_id.as_str();
        let queue = &self.registry.context().queue;

        let collection = match self.registry.find(name).await {
            Some(c) => c,
            None => {
                tracing::debug!(collection = name, document = id, "collection gone, dropping task");
                queue.complete(name, id, IndexTaskState::Failed, task.prior_status);
                return;
            }
        };

        loop {
            let attempt = queue.begin_attempt(name, id);
            tracing::info!(collection = name, document = id, attempt, "indexing pass started");

            match self.attempt(&collection, id).await {
                Ok(chunks) => {
                    tracing::info!(collection = name, document = id, chunks, "chunk set committed");
                    self.settle(&collection, id, PassResult::Indexed).await;
                    return;
                }
                Err(e @ IndexError::Retrieval { .. }) => {
                    tracing::warn!(collection = name, document = id, error = %e, "content unavailable, task dropped");
                    self.settle(&collection, id, PassResult::Dropped).await;
                    return;
                }
                Err(e) if e.is_retryable() && !self.retry.exhausted(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        collection = name,
                        document = id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "indexing attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(collection = name, document = id, attempt, error = %e, "indexing failed");
                    self.settle(&collection, id, PassResult::Failed(e.to_string()))
                        .await;
                    return;
                }
            }
        }
    }

    async fn settle(&self, collection: &Collection, id: &str, result: PassResult) {
        let indexed = result == PassResult::Indexed;
        match collection.complete_pass(id, result) {
            Ok(disposition) => {
                if disposition.requeued {
                    tracing::debug!(collection = collection.name(), document = id, "superseded, pass re-queued");
                }
                if indexed && !disposition.present {
                    // Removed while the pass was running.
                    if let Err(e) = self.store.delete_document(collection.name(), id).await {
                        tracing::error!(collection = collection.name(), document = id, error = %e, "failed to purge removed document");
                    }
                }
            }
            Err(e) => {
                tracing::error!(collection = collection.name(), document = id, error = %e, "failed to settle pass");
            }
        }
    }

    /// One attempt. Returns the number of chunks committed.
    async fn attempt(&self, collection: &Collection, id: &str) -> IndexResult<usize> {
        let name = collection.name();
        let content = self.storage.load_content(name, id).await?;
        let settings = collection.settings()?;

        let chunks = settings.chunking.apply(id, &content.content)?;
        let client = self.models.get(&settings.embedding_model)?;

        let metadata = DocumentMetadata {
            collection: name.to_string(),
            document_id: id.to_string(),
            title: content.title.clone(),
            language: content.language.clone(),
            url: content.url.clone(),
            mime_type: content.mime_type.clone(),
            embedding_model: settings.embedding_model.clone(),
        };
        if !collection.apply_content(id, content)? {
            tracing::debug!(collection = name, document = id, "document no longer tracked, skipping");
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self
                .with_timeout("embed", client.embed(&chunk.text))
                .await?;
            check_dims(client.dims(), &vector)?;
            vectors.push(vector);
        }
        tracing::debug!(collection = name, document = id, chunks = chunks.len(), "chunks embedded");

        self.with_timeout(
            "index store upsert",
            self.store.upsert_document(&metadata, &chunks, &vectors),
        )
        .await?;
        Ok(chunks.len())
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = IndexResult<T>>,
    ) -> IndexResult<T> {
        retry::with_timeout(self.call_timeout, operation, call).await
    }
}

#[async_trait]
impl TaskHandler for IndexPipeline {
    async fn handle(&self, task: IndexTask) {
        self.process(&task).await;
    }

    async fn abandon(&self, task: IndexTask, cause: String) {
        let name = task.collection.as_str();
        let id = task.document_id.as_str();
        match self.registry.find(name).await {
            Some(collection) => self.settle(&collection, id, PassResult::Failed(cause)).await,
            None => {
                self.registry
                    .context()
                    .queue
                    .complete(name, id, IndexTaskState::Failed, task.prior_status);
            }
        }
    }
}
