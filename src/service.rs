//! [`WikiIndex`]: wires storage, registry, queue, worker and event listener.
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use wiki_index::config::load_config;
//! use wiki_index::service::WikiIndex;
//!
//! let config = load_config(std::path::Path::new("./config/wiki-index.toml"))?;
//! let index = WikiIndex::from_config(&config).await?;
//! index.sync_collection("Docs").await?;
//! index.wait_idle().await;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use wiki_index_core::acl::GroupResolver;
use wiki_index_core::models::IndexStatus;
use wiki_index_core::store::memory::InMemoryIndexStore;
use wiki_index_core::store::{IndexStore, ScoredChunk};
use wiki_index_core::IndexResult;

use crate::collection::IndexContext;
use crate::config::{Config, QueueConfig};
use crate::embedding::EmbeddingModels;
use crate::events::{self, ChangeEvent};
use crate::identity::StaticGroups;
use crate::pipeline::IndexPipeline;
use crate::queue::{IndexQueue, Worker};
use crate::registry::CollectionRegistry;
use crate::retry::RetryPolicy;
use crate::search::{self, QueryInput};
use crate::sqlite_store::SqliteIndexStore;
use crate::storage::{DocumentStorage, FsDocumentStorage, InMemoryDocumentStorage};

/// Capacity of the change-event channel.
const EVENT_BUFFER: usize = 1024;

/// External collaborators of a [`WikiIndex`].
pub struct Components {
    pub storage: Arc<dyn DocumentStorage>,
    pub store: Arc<dyn IndexStore>,
    pub models: EmbeddingModels,
    pub groups: Arc<dyn GroupResolver>,
}

/// Per-collection summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub embedding_model: String,
    pub chunking_method: String,
    pub documents: usize,
    pub unindexed: usize,
    pub pending: usize,
    pub indexed: usize,
    pub failed: usize,
    pub chunks: usize,
}

pub struct WikiIndex {
    registry: Arc<CollectionRegistry>,
    queue: Arc<IndexQueue>,
    store: Arc<dyn IndexStore>,
    storage: Arc<dyn DocumentStorage>,
    events: mpsc::Sender<ChangeEvent>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl WikiIndex {
    /// Start the worker and event listener. Must run inside a tokio runtime.
    pub fn start(components: Components, queue_config: &QueueConfig) -> Self {
        let queue = Arc::new(IndexQueue::new());
        let ctx = IndexContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&components.store),
            groups: components.groups,
            models: Arc::new(components.models),
            call_timeout: queue_config.call_timeout(),
        };
        let registry = Arc::new(CollectionRegistry::new(ctx));

        let pipeline = Arc::new(IndexPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&components.storage),
            RetryPolicy::from_config(queue_config),
            queue_config.call_timeout(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker::spawn(
            Arc::clone(&queue),
            pipeline,
            queue_config.parallelism,
            shutdown_rx,
        );

        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let listener = events::spawn_listener(Arc::clone(&registry), events_rx);

        Self {
            registry,
            queue,
            store: components.store,
            storage: components.storage,
            events,
            shutdown,
            worker: Mutex::new(Some(worker)),
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Build every collaborator from configuration, load the configured
    /// collections, and start.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn IndexStore> = match &config.db {
            Some(db) => Arc::new(SqliteIndexStore::open(db).await?),
            None => Arc::new(InMemoryIndexStore::new()),
        };
        let storage: Arc<dyn DocumentStorage> = match &config.storage {
            Some(storage) => Arc::new(
                FsDocumentStorage::new(storage).context("invalid [storage] include_globs")?,
            ),
            None => Arc::new(InMemoryDocumentStorage::new()),
        };
        let models = EmbeddingModels::from_config(&config.embedding)?;

        let index = Self::start(
            Components {
                storage,
                store,
                models,
                groups: Arc::new(StaticGroups::from_config(&config.identity)),
            },
            &config.queue,
        );
        index
            .registry
            .load_from_config(&config.collections, &config.chunking)
            .await;
        index
            .restore_from_index()
            .await
            .context("failed to read indexed documents")?;
        Ok(index)
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<IndexQueue> {
        &self.queue
    }

    pub fn storage(&self) -> &Arc<dyn DocumentStorage> {
        &self.storage
    }

    pub fn models(&self) -> &EmbeddingModels {
        &self.registry.context().models
    }

    /// Sender for content-change producers.
    pub fn events(&self) -> mpsc::Sender<ChangeEvent> {
        self.events.clone()
    }

    /// Deliver a change event. Never fails: a closed listener is logged.
    pub async fn notify(&self, event: ChangeEvent) {
        if let Err(e) = self.events.send(event).await {
            tracing::error!(collection = %e.0.collection, document = %e.0.document_id, "change listener closed, event lost");
        }
    }

    /// Track every document the index store already holds as indexed, so
    /// status and stats reflect a persistent index across restarts.
    /// Returns how many documents were added.
    pub async fn restore_from_index(&self) -> IndexResult<usize> {
        let mut restored = 0;
        for collection in self.registry.list_collections().await {
            let indexed = self.store.documents(collection.name()).await?;
            restored += collection.restore_indexed(indexed)?;
        }
        tracing::info!(documents = restored, "tracked documents restored from index");
        Ok(restored)
    }

    /// Queue every document storage holds for a collection.
    /// Returns how many documents were found.
    pub async fn sync_collection(&self, name: &str) -> IndexResult<usize> {
        let collection = self.registry.get_collection(name).await?;
        let ids = self.storage.list_documents(name).await?;
        for id in &ids {
            collection.notify(id)?;
        }
        tracing::info!(collection = name, documents = ids.len(), "collection sync queued");
        Ok(ids.len())
    }

    pub async fn query(
        &self,
        principal: &str,
        input: &QueryInput,
        k: usize,
    ) -> IndexResult<Vec<ScoredChunk>> {
        search::query(&self.registry, principal, input, k).await
    }

    pub async fn stats(&self) -> IndexResult<Vec<CollectionStats>> {
        let mut stats = Vec::new();
        for collection in self.registry.list_collections().await {
            let settings = collection.settings()?;
            let counts = collection.status_counts()?;
            let count = |s: IndexStatus| counts.get(&s).copied().unwrap_or(0);
            stats.push(CollectionStats {
                name: collection.name().to_string(),
                embedding_model: settings.embedding_model,
                chunking_method: settings.chunking.method,
                documents: collection.len(),
                unindexed: count(IndexStatus::Unindexed),
                pending: count(IndexStatus::Pending),
                indexed: count(IndexStatus::Indexed),
                failed: count(IndexStatus::Failed),
                chunks: self.store.chunk_count(Some(collection.name())).await?,
            });
        }
        Ok(stats)
    }

    /// Wipe the vector index. Tracked documents go back to unindexed.
    pub async fn clear_index(&self) -> IndexResult<()> {
        self.store.clear().await?;
        for collection in self.registry.list_collections().await {
            collection.reset_statuses()?;
        }
        tracing::info!("index cleared");
        Ok(())
    }

    /// Resolve once the queue holds no pending or processing task.
    ///
    /// Events still buffered in the change channel are not counted.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Stop the worker after in-flight passes finish, and the listener.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "index worker panicked");
            }
        }
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
    }
}
