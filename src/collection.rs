//! Collections: named sets of documents under one ACL and indexing policy.
//!
//! Caller-facing operations take the acting principal and are checked
//! against the collection ACL before they touch anything:
//!
//! | Operation | Required tier |
//! |-----------|---------------|
//! | [`get_document_list`](Collection::get_document_list), [`get_document`](Collection::get_document), [`document_status`](Collection::document_status) | use |
//! | [`create_document`](Collection::create_document), [`remove_document`](Collection::remove_document) | manager |
//! | [`set_acl`](Collection::set_acl), [`set_chunking`](Collection::set_chunking), [`set_embedding_model`](Collection::set_embedding_model) | admin |
//!
//! The pipeline-facing methods (`notify`, `apply_content`, `complete_pass`)
//! are unchecked; change notifications come from trusted producers.
//!
//! Lock order is documents → queue: the document lock is held while the
//! queue table is updated, so a document's status always agrees with its
//! task. Nothing takes the queue lock first.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use wiki_index_core::acl::{authorize, Action, CollectionAcl, GroupResolver};
use wiki_index_core::chunk::ChunkingPolicy;
use wiki_index_core::models::{Document, DocumentContent, IndexStatus, IndexTaskState};
use wiki_index_core::store::{DocumentMetadata, IndexStore};
use wiki_index_core::{IndexError, IndexResult};

use crate::embedding::EmbeddingModels;
use crate::queue::{EnqueueOutcome, IndexQueue};

/// Shared collaborators every collection needs.
#[derive(Clone)]
pub struct IndexContext {
    pub queue: Arc<IndexQueue>,
    pub store: Arc<dyn IndexStore>,
    pub groups: Arc<dyn GroupResolver>,
    pub models: Arc<EmbeddingModels>,
    /// Bound on query-time embed calls.
    pub call_timeout: Duration,
}

/// Mutable policy of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSettings {
    pub acl: CollectionAcl,
    pub chunking: ChunkingPolicy,
    pub embedding_model: String,
}

/// How a pipeline pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PassResult {
    Indexed,
    Failed(String),
    /// Content could not be loaded; the index was not touched.
    Dropped,
}

/// What happened when a pass was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassDisposition {
    /// A superseding enqueue scheduled another pass.
    pub requeued: bool,
    /// The document still belongs to a live collection.
    pub present: bool,
}

pub struct Collection {
    name: String,
    settings: RwLock<CollectionSettings>,
    documents: RwLock<BTreeMap<String, Document>>,
    deleted: AtomicBool,
    ctx: IndexContext,
}

fn poisoned<T>(_: PoisonError<T>) -> IndexError {
    IndexError::Storage("collection lock poisoned".to_string())
}

impl Collection {
    pub(crate) fn new(name: &str, settings: CollectionSettings, ctx: IndexContext) -> Self {
        Self {
            name: name.to_string(),
            settings: RwLock::new(settings),
            documents: RwLock::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> IndexResult<CollectionSettings> {
        Ok(self.settings.read().map_err(poisoned)?.clone())
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn docs(&self) -> IndexResult<RwLockReadGuard<'_, BTreeMap<String, Document>>> {
        self.documents.read().map_err(poisoned)
    }

    fn docs_mut(&self) -> IndexResult<RwLockWriteGuard<'_, BTreeMap<String, Document>>> {
        self.documents.write().map_err(poisoned)
    }

    /// Check `principal` against this collection's ACL.
    pub fn authorize(&self, principal: &str, action: Action) -> IndexResult<()> {
        let settings = self.settings.read().map_err(poisoned)?;
        authorize(
            principal,
            &self.name,
            &settings.acl,
            action,
            self.ctx.groups.as_ref(),
        )
    }

    /// Whether `principal` may perform `action`, without an error value.
    pub fn allows(&self, principal: &str, action: Action) -> bool {
        self.authorize(principal, action).is_ok()
    }

    fn not_found(&self, document_id: &str) -> IndexError {
        IndexError::DocumentNotFound {
            collection: self.name.clone(),
            document_id: document_id.to_string(),
        }
    }

    // ============ Caller-facing ============

    /// A page of documents, ordered by id.
    pub fn get_document_list(
        &self,
        principal: &str,
        offset: usize,
        count: usize,
    ) -> IndexResult<Vec<Document>> {
        self.authorize(principal, Action::Read)?;
        Ok(self
            .docs()?
            .values()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }

    pub fn get_document(&self, principal: &str, document_id: &str) -> IndexResult<Document> {
        self.authorize(principal, Action::Read)?;
        self.docs()?
            .get(document_id)
            .cloned()
            .ok_or_else(|| self.not_found(document_id))
    }

    /// Status and, for failed documents, the last error cause.
    pub fn document_status(
        &self,
        principal: &str,
        document_id: &str,
    ) -> IndexResult<(IndexStatus, Option<String>)> {
        let doc = self.get_document(principal, document_id)?;
        Ok((doc.status, doc.last_error))
    }

    /// Register a document and queue it for indexing.
    pub fn create_document(&self, principal: &str, document_id: &str) -> IndexResult<Document> {
        self.authorize(principal, Action::CreateDocument)?;
        self.notify(document_id)?;
        self.docs()?
            .get(document_id)
            .cloned()
            .ok_or_else(|| self.not_found(document_id))
    }

    /// Remove a document and purge its chunks. Returns chunks removed.
    pub async fn remove_document(&self, principal: &str, document_id: &str) -> IndexResult<usize> {
        self.authorize(principal, Action::RemoveDocument)?;
        let existed = self.docs_mut()?.remove(document_id).is_some();
        let removed = self
            .ctx
            .store
            .delete_document(&self.name, document_id)
            .await?;
        if !existed && removed == 0 {
            return Err(self.not_found(document_id));
        }
        tracing::info!(collection = %self.name, document = document_id, chunks = removed, "document removed");
        Ok(removed)
    }

    pub fn set_acl(&self, principal: &str, acl: CollectionAcl) -> IndexResult<()> {
        self.authorize(principal, Action::EditAcl)?;
        self.settings.write().map_err(poisoned)?.acl = acl;
        tracing::info!(collection = %self.name, principal, "ACL updated");
        Ok(())
    }

    /// Change the chunking policy and re-queue every document.
    pub fn set_chunking(&self, principal: &str, policy: ChunkingPolicy) -> IndexResult<usize> {
        self.authorize(principal, Action::EditChunking)?;
        policy.validate()?;
        self.settings.write().map_err(poisoned)?.chunking = policy;
        tracing::info!(collection = %self.name, principal, "chunking policy updated");
        self.reindex_all()
    }

    /// Switch embedding model and re-queue every document.
    pub fn set_embedding_model(&self, principal: &str, model: &str) -> IndexResult<usize> {
        self.authorize(principal, Action::EditEmbeddingModel)?;
        self.ctx.models.get(model)?;
        self.settings.write().map_err(poisoned)?.embedding_model = model.to_string();
        tracing::info!(collection = %self.name, principal, model, "embedding model updated");
        self.reindex_all()
    }

    // ============ Pipeline-facing ============

    /// Content-change notification: track the document and queue a pass.
    pub fn notify(&self, document_id: &str) -> IndexResult<EnqueueOutcome> {
        let mut docs = self.docs_mut()?;
        let doc = docs
            .entry(document_id.to_string())
            .or_insert_with(|| Document::new(&self.name, document_id));
        let outcome = self
            .ctx
            .queue
            .enqueue_from(&self.name, document_id, doc.status);
        if outcome == EnqueueOutcome::Queued {
            doc.set_status(IndexStatus::Pending);
        }
        Ok(outcome)
    }

    /// Queue every tracked document. Returns how many were newly queued.
    pub fn reindex_all(&self) -> IndexResult<usize> {
        let ids: Vec<String> = self.docs()?.keys().cloned().collect();
        let mut queued = 0;
        for id in ids {
            if self.notify(&id)? == EnqueueOutcome::Queued {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Drop a document without an ACL check (storage reported it gone).
    pub async fn purge_document(&self, document_id: &str) -> IndexResult<usize> {
        self.docs_mut()?.remove(document_id);
        self.ctx.store.delete_document(&self.name, document_id).await
    }

    /// Record the snapshot a pass is about to index.
    /// Returns `false` if the document is no longer tracked.
    pub fn apply_content(&self, document_id: &str, content: DocumentContent) -> IndexResult<bool> {
        let mut docs = self.docs_mut()?;
        match docs.get_mut(document_id) {
            Some(doc) => {
                doc.apply_content(content);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Settle a pass: finish its task and set the document status.
    pub fn complete_pass(&self, document_id: &str, result: PassResult) -> IndexResult<PassDisposition> {
        let mut docs = self.docs_mut()?;

        let (state, settled) = match &result {
            PassResult::Indexed => (IndexTaskState::Done, IndexStatus::Indexed),
            PassResult::Failed(_) => (IndexTaskState::Failed, IndexStatus::Failed),
            PassResult::Dropped => {
                let prior = self
                    .ctx
                    .queue
                    .task(&self.name, document_id)
                    .map(|t| t.prior_status)
                    .unwrap_or(IndexStatus::Unindexed);
                (IndexTaskState::Failed, prior)
            }
        };
        let requeued = self
            .ctx
            .queue
            .complete(&self.name, document_id, state, settled);

        let present = match docs.get_mut(document_id) {
            Some(doc) if !self.is_deleted() => {
                if requeued {
                    doc.set_status(IndexStatus::Pending);
                } else if let PassResult::Failed(cause) = &result {
                    doc.mark_failed(cause);
                } else {
                    doc.set_status(settled);
                }
                true
            }
            _ => false,
        };

        Ok(PassDisposition { requeued, present })
    }

    /// Track documents the index store already holds, as indexed.
    /// Documents already tracked are left alone. Returns how many were added.
    pub fn restore_indexed(&self, indexed: Vec<DocumentMetadata>) -> IndexResult<usize> {
        let mut docs = self.docs_mut()?;
        let mut added = 0;
        for meta in indexed {
            if docs.contains_key(&meta.document_id) {
                continue;
            }
            let mut doc = Document::new(&self.name, &meta.document_id);
            doc.title = meta.title;
            doc.language = meta.language;
            doc.url = meta.url;
            doc.mime_type = meta.mime_type;
            doc.set_status(IndexStatus::Indexed);
            docs.insert(meta.document_id, doc);
            added += 1;
        }
        Ok(added)
    }

    /// Forget index state after the index store was wiped.
    pub fn reset_statuses(&self) -> IndexResult<()> {
        for doc in self.docs_mut()?.values_mut() {
            if doc.status != IndexStatus::Pending {
                doc.set_status(IndexStatus::Unindexed);
            }
        }
        Ok(())
    }

    // ============ Reporting ============

    /// Document counts per status.
    pub fn status_counts(&self) -> IndexResult<HashMap<IndexStatus, usize>> {
        let mut counts = HashMap::new();
        for doc in self.docs()?.values() {
            *counts.entry(doc.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn document_ids(&self) -> IndexResult<Vec<String>> {
        Ok(self.docs()?.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.docs().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
