//! End-to-end tests for the indexing pipeline: queue dedup, supersede,
//! retry and failure handling, atomic chunk replacement.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use wiki_index::collection::{Collection, IndexContext};
use wiki_index::identity::StaticGroups;
use wiki_index::pipeline::IndexPipeline;
use wiki_index::queue::{EnqueueOutcome, IndexQueue};
use wiki_index::registry::CollectionRegistry;
use wiki_index::retry::RetryPolicy;
use wiki_index::storage::{DocumentStorage, InMemoryDocumentStorage};
use wiki_index_core::chunk::ChunkingPolicy;
use wiki_index_core::embedding::EmbeddingClient;
use wiki_index_core::models::IndexStatus;
use wiki_index_core::store::memory::InMemoryIndexStore;
use wiki_index_core::store::IndexStore;
use wiki_index_core::IndexError;

use common::*;

async fn collection(h: &Harness, name: &str, model: &str) -> Arc<Collection> {
    h.index
        .registry()
        .create_collection(
            name,
            standard_acl(),
            ChunkingPolicy::new("fixed-size", 100, 20),
            model,
        )
        .await
        .unwrap()
}

fn status(collection: &Collection, id: &str) -> (IndexStatus, Option<String>) {
    collection.document_status("root", id).unwrap()
}

// ─── Happy path ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_document_indexed_into_overlapping_chunks() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", &text_of_len(250));
    assert_eq!(docs.notify("d1").unwrap(), EnqueueOutcome::Queued);
    assert_eq!(status(&docs, "d1").0, IndexStatus::Pending);

    wait_idle(&h.index).await;

    assert_eq!(status(&docs, "d1"), (IndexStatus::Indexed, None));
    let chunks = h.store.document_chunks("Docs", "d1").await.unwrap();
    let lengths: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
    assert_eq!(lengths, vec![100, 100, 90]);
    assert_eq!(
        chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let removed = docs.remove_document("root", "d1").await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 0);
    assert!(matches!(
        docs.get_document("root", "d1"),
        Err(IndexError::DocumentNotFound { .. })
    ));

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_many_documents_all_indexed() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    for i in 0..25 {
        let id = format!("page-{i:02}");
        h.storage.put("Docs", &id, &text_of_len(120 + i));
        docs.notify(&id).unwrap();
    }
    wait_idle(&h.index).await;

    let counts = docs.status_counts().unwrap();
    assert_eq!(counts.get(&IndexStatus::Indexed), Some(&25));
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 50);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", &text_of_len(250));
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    let first = h.store.document_chunks("Docs", "d1").await.unwrap();

    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    let second = h.store.document_chunks("Docs", "d1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.chunk_count(None).await.unwrap(), 3);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_shorter_content_replaces_whole_chunk_set() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", &text_of_len(250));
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 3);

    h.storage.put("Docs", "d1", "a short page");
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;

    let chunks = h.store.document_chunks("Docs", "d1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "a short page");

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_empty_document_indexed_without_chunks() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "blank", "   \n\n  ");
    docs.notify("blank").unwrap();
    wait_idle(&h.index).await;

    assert_eq!(status(&docs, "blank").0, IndexStatus::Indexed);
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 0);

    h.index.shutdown().await;
}

// ─── Dedup and supersede ────────────────────────────────────────────

#[tokio::test]
async fn test_notifications_during_pass_rerun_once() {
    let (gated, mut entered) = GatedClient::new();
    let h = start(
        models(vec![("gated", gated.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let docs = collection(&h, "Docs", "gated").await;

    h.storage.put("Docs", "d1", "first revision");
    assert_eq!(docs.notify("d1").unwrap(), EnqueueOutcome::Queued);
    entered.recv().await.unwrap();

    // The pass is in flight: further notifications collapse into one rerun.
    h.storage.put("Docs", "d1", "second revision");
    assert_eq!(docs.notify("d1").unwrap(), EnqueueOutcome::Superseded);
    assert_eq!(docs.notify("d1").unwrap(), EnqueueOutcome::Superseded);
    assert_eq!(h.index.queue().len(), 1);

    gated.open();
    wait_idle(&h.index).await;

    assert_eq!(gated.calls.load(Ordering::SeqCst), 2);
    assert_eq!(status(&docs, "d1").0, IndexStatus::Indexed);
    let chunks = h.store.document_chunks("Docs", "d1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "second revision");

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_pending_notifications_deduplicated() {
    let (gated, mut entered) = GatedClient::new();
    let h = start(
        models(vec![("gated", gated.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    // parallelism 4: block four passes so d5 stays pending.
    let docs = collection(&h, "Docs", "gated").await;
    for i in 1..=5 {
        h.storage.put("Docs", &format!("d{i}"), "body");
    }
    for i in 1..=4 {
        docs.notify(&format!("d{i}")).unwrap();
    }
    for _ in 0..4 {
        entered.recv().await.unwrap();
    }

    assert_eq!(docs.notify("d5").unwrap(), EnqueueOutcome::Queued);
    assert_eq!(docs.notify("d5").unwrap(), EnqueueOutcome::Deduplicated);
    assert_eq!(docs.notify("d5").unwrap(), EnqueueOutcome::Deduplicated);

    gated.open();
    wait_idle(&h.index).await;

    assert_eq!(gated.calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        docs.status_counts().unwrap().get(&IndexStatus::Indexed),
        Some(&5)
    );

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_removed_during_pass_leaves_no_chunks() {
    let (gated, mut entered) = GatedClient::new();
    let h = start(
        models(vec![("gated", gated.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let docs = collection(&h, "Docs", "gated").await;

    h.storage.put("Docs", "d1", "doomed page");
    docs.notify("d1").unwrap();
    entered.recv().await.unwrap();

    assert_eq!(docs.remove_document("root", "d1").await.unwrap(), 0);
    gated.open();
    wait_idle(&h.index).await;

    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 0);
    assert!(docs.is_empty());

    h.index.shutdown().await;
}

// ─── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_exhausted_retries_mark_failed_without_blocking_others() {
    let failing = Arc::new(FailingClient::new());
    let h = start(
        models(vec![("bad", failing.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let broken = collection(&h, "Broken", "bad").await;
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Broken", "x", "one chunk of text");
    broken.notify("x").unwrap();
    for i in 0..5 {
        let id = format!("d{i}");
        h.storage.put("Docs", &id, "healthy page");
        docs.notify(&id).unwrap();
    }
    wait_idle(&h.index).await;

    let (state, cause) = status(&broken, "x");
    assert_eq!(state, IndexStatus::Failed);
    assert!(cause.unwrap().contains("service unavailable"));
    assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        docs.status_counts().unwrap().get(&IndexStatus::Indexed),
        Some(&5)
    );

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_panicking_pass_marks_document_failed() {
    let h = start(
        models(vec![("boom", Arc::new(PanickingClient) as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let broken = collection(&h, "Broken", "boom").await;
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Broken", "x", "one chunk of text");
    h.storage.put("Docs", "d1", "healthy page");
    broken.notify("x").unwrap();
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;

    let (state, cause) = status(&broken, "x");
    assert_eq!(state, IndexStatus::Failed);
    let cause = cause.unwrap();
    assert!(cause.contains("panicked"));
    assert!(cause.contains("embedder exploded"));
    assert_eq!(status(&docs, "d1").0, IndexStatus::Indexed);

    // The task slot was released, so the document can be queued again.
    assert_eq!(broken.notify("x").unwrap(), EnqueueOutcome::Queued);
    wait_idle(&h.index).await;
    assert_eq!(status(&broken, "x").0, IndexStatus::Failed);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let flaky = Arc::new(FlakyClient::new(2));
    let h = start(
        models(vec![("flaky", flaky.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let docs = collection(&h, "Docs", "flaky").await;

    h.storage.put("Docs", "d1", "eventually embedded");
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;

    assert_eq!(status(&docs, "d1"), (IndexStatus::Indexed, None));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 1);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_failed_document_recovers_on_next_notification() {
    let flaky = Arc::new(FlakyClient::new(3));
    let h = start(
        models(vec![("flaky", flaky.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let docs = collection(&h, "Docs", "flaky").await;

    h.storage.put("Docs", "d1", "second time lucky");
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(status(&docs, "d1").0, IndexStatus::Failed);

    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(status(&docs, "d1"), (IndexStatus::Indexed, None));

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_retrieval_error_drops_task_and_restores_status() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    // Never indexed: back to unindexed.
    h.storage.fail("Docs", "missing", "object vanished");
    docs.notify("missing").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(status(&docs, "missing"), (IndexStatus::Unindexed, None));

    // Previously indexed: stays indexed, old chunks untouched.
    h.storage.put("Docs", "d1", &text_of_len(250));
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    h.storage.fail("Docs", "d1", "permission revoked");
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;

    assert_eq!(status(&docs, "d1").0, IndexStatus::Indexed);
    assert_eq!(h.store.document_chunks("Docs", "d1").await.unwrap().len(), 3);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_embed_timeout_counts_as_failed_attempt() {
    let slow: Arc<dyn EmbeddingClient> = Arc::new(SlowClient::new(Duration::from_millis(500)));
    let storage = Arc::new(InMemoryDocumentStorage::new());
    let store = Arc::new(InMemoryIndexStore::new());
    let queue = Arc::new(IndexQueue::new());
    let registry = Arc::new(CollectionRegistry::new(IndexContext {
        queue: Arc::clone(&queue),
        store: store.clone(),
        groups: Arc::new(StaticGroups::new()),
        models: Arc::new(models(vec![("slow", slow)])),
        call_timeout: Duration::from_secs(5),
    }));
    let docs = registry
        .create_collection("Docs", standard_acl(), ChunkingPolicy::default(), "slow")
        .await
        .unwrap();

    let pipeline = IndexPipeline::new(
        Arc::clone(&registry),
        storage.clone() as Arc<dyn DocumentStorage>,
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        Duration::from_millis(20),
    );

    storage.put("Docs", "d1", "too slow to embed");
    docs.notify("d1").unwrap();
    let task = queue.try_dequeue().unwrap();
    pipeline.process(&task).await;

    let (state, cause) = status(&docs, "d1");
    assert_eq!(state, IndexStatus::Failed);
    assert!(cause.unwrap().contains("timed out"));
    assert!(queue.is_empty());
    assert_eq!(store.chunk_count(None).await.unwrap(), 0);
}

// ─── Policy edits ───────────────────────────────────────────────────

#[tokio::test]
async fn test_chunking_change_reindexes_documents() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", &text_of_len(250));
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 3);

    let queued = docs
        .set_chunking("root", ChunkingPolicy::new("fixed-size", 50, 0))
        .unwrap();
    assert_eq!(queued, 1);
    wait_idle(&h.index).await;
    assert_eq!(h.store.chunk_count(Some("Docs")).await.unwrap(), 5);

    assert!(matches!(
        docs.set_chunking("ursula", ChunkingPolicy::default()),
        Err(IndexError::AccessDenied { .. })
    ));
    assert!(matches!(
        docs.set_chunking("root", ChunkingPolicy::new("sentence", 50, 0)),
        Err(IndexError::Configuration(_))
    ));

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_embedding_model_switch_reindexes_with_new_model() {
    let recording = Arc::new(RecordingClient::new());
    let h = start(
        models(vec![("rec", recording.clone() as Arc<dyn EmbeddingClient>)]),
        StaticGroups::new(),
    );
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", "switch me");
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;
    assert!(recording.seen.lock().await.is_empty());

    docs.set_embedding_model("root", "rec").unwrap();
    wait_idle(&h.index).await;
    assert_eq!(*recording.seen.lock().await, vec!["switch me".to_string()]);
    assert_eq!(docs.settings().unwrap().embedding_model, "rec");

    assert!(matches!(
        docs.set_embedding_model("root", "nope"),
        Err(IndexError::Configuration(_))
    ));

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_clear_index_resets_statuses() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;

    h.storage.put("Docs", "d1", &text_of_len(250));
    docs.notify("d1").unwrap();
    wait_idle(&h.index).await;

    h.index.clear_index().await.unwrap();
    assert_eq!(h.store.chunk_count(None).await.unwrap(), 0);
    assert_eq!(status(&docs, "d1").0, IndexStatus::Unindexed);

    let stats = h.index.stats().await.unwrap();
    assert_eq!(stats[0].unindexed, 1);
    assert_eq!(stats[0].chunks, 0);

    h.index.shutdown().await;
}

#[tokio::test]
async fn test_sync_collection_queues_stored_documents() {
    let h = start(models(vec![]), StaticGroups::new());
    let docs = collection(&h, "Docs", "m1").await;
    h.storage.put("Docs", "a", "alpha page");
    h.storage.put("Docs", "b", "beta page");
    h.storage.put("Other", "c", "not ours");

    assert_eq!(h.index.sync_collection("Docs").await.unwrap(), 2);
    wait_idle(&h.index).await;

    assert_eq!(docs.document_ids().unwrap(), vec!["a", "b"]);
    let stats = h.index.stats().await.unwrap();
    assert_eq!(stats[0].indexed, 2);
    assert!(matches!(
        h.index.sync_collection("Other").await,
        Err(IndexError::CollectionNotFound(_))
    ));

    h.index.shutdown().await;
}
