//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};

use wiki_index::config::QueueConfig;
use wiki_index::embedding::{EmbeddingModels, HashEmbeddingClient};
use wiki_index::identity::StaticGroups;
use wiki_index::service::{Components, WikiIndex};
use wiki_index::storage::InMemoryDocumentStorage;
use wiki_index_core::acl::{AclList, CollectionAcl};
use wiki_index_core::embedding::EmbeddingClient;
use wiki_index_core::store::memory::InMemoryIndexStore;
use wiki_index_core::{IndexError, IndexResult};

pub const DIMS: usize = 256;

// ─── Stub embedders ─────────────────────────────────────────────────

/// Always fails with an embedding error.
pub struct FailingClient {
    pub calls: AtomicUsize,
}

impl FailingClient {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for FailingClient {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _text: &str) -> IndexResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IndexError::Embedding("service unavailable".to_string()))
    }
}

/// Fails the first `failures` calls, then embeds normally.
pub struct FlakyClient {
    inner: HashEmbeddingClient,
    failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyClient {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: HashEmbeddingClient::new("flaky", DIMS),
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for FlakyClient {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(IndexError::Embedding(format!("transient failure #{}", n + 1)));
        }
        self.inner.embed(text).await
    }
}

/// Blocks every call until the test releases it; reports each call.
pub struct GatedClient {
    inner: HashEmbeddingClient,
    entered: mpsc::UnboundedSender<String>,
    release: Semaphore,
    pub calls: AtomicUsize,
}

impl GatedClient {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (entered, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                inner: HashEmbeddingClient::new("gated", DIMS),
                entered,
                release: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn open(&self) {
        self.release.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl EmbeddingClient for GatedClient {
    fn model_name(&self) -> &str {
        "gated"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.entered.send(text.to_string());
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;
        permit.forget();
        self.inner.embed(text).await
    }
}

/// Sleeps before answering.
pub struct SlowClient {
    inner: HashEmbeddingClient,
    delay: Duration,
}

impl SlowClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashEmbeddingClient::new("slow", DIMS),
            delay,
        }
    }
}

#[async_trait]
impl EmbeddingClient for SlowClient {
    fn model_name(&self) -> &str {
        "slow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }
}

/// Panics on every call.
pub struct PanickingClient;

#[async_trait]
impl EmbeddingClient for PanickingClient {
    fn model_name(&self) -> &str {
        "panicking"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _text: &str) -> IndexResult<Vec<f32>> {
        panic!("embedder exploded")
    }
}

/// Records the order texts were embedded in.
pub struct RecordingClient {
    inner: HashEmbeddingClient,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddingClient::new("recording", DIMS),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EmbeddingClient for RecordingClient {
    fn model_name(&self) -> &str {
        "recording"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        self.seen.lock().await.push(text.to_string());
        self.inner.embed(text).await
    }
}

// ─── Harness ────────────────────────────────────────────────────────

pub struct Harness {
    pub index: WikiIndex,
    pub storage: Arc<InMemoryDocumentStorage>,
    pub store: Arc<InMemoryIndexStore>,
}

pub fn queue_config() -> QueueConfig {
    QueueConfig {
        parallelism: 4,
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        call_timeout_secs: 5,
    }
}

/// Model table with a hash model `m1` plus any extra clients.
pub fn models(extra: Vec<(&str, Arc<dyn EmbeddingClient>)>) -> EmbeddingModels {
    let mut models = EmbeddingModels::new().with("m1", Arc::new(HashEmbeddingClient::new("m1", DIMS)));
    for (id, client) in extra {
        models.insert(id, client);
    }
    models
}

pub fn start(models: EmbeddingModels, groups: StaticGroups) -> Harness {
    let storage = Arc::new(InMemoryDocumentStorage::new());
    let store = Arc::new(InMemoryIndexStore::new());
    let index = WikiIndex::start(
        Components {
            storage: storage.clone(),
            store: store.clone(),
            models,
            groups: Arc::new(groups),
        },
        &queue_config(),
    );
    Harness {
        index,
        storage,
        store,
    }
}

/// `root` administers; `ursula` may use; members of `editors` manage.
pub fn standard_acl() -> CollectionAcl {
    CollectionAcl {
        use_tier: AclList::users(["ursula"]),
        manager: AclList::new(Vec::<String>::new(), ["editors"]),
        admin: AclList::users(["root"]),
    }
}

/// `count` characters of varied, word-separated text.
pub fn text_of_len(count: usize) -> String {
    let words = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    let mut out = String::new();
    let mut i = 0;
    while out.chars().count() < count {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(words[i % words.len()]);
        i += 1;
    }
    out.chars().take(count).collect()
}

pub async fn wait_idle(index: &WikiIndex) {
    tokio::time::timeout(Duration::from_secs(10), index.wait_idle())
        .await
        .expect("queue did not drain");
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
