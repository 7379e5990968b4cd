//! Core data models for the wiki index.
//!
//! These types describe the documents tracked by a collection, the chunks
//! derived from them, and the bookkeeping record the index queue keeps for
//! every pending or in-flight indexing attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Indexing status of a document, surfaced to administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Unindexed,
    Pending,
    Indexed,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Unindexed => "unindexed",
            IndexStatus::Pending => "pending",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields a document-storage collaborator supplies for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub title: String,
    pub language: String,
    pub url: String,
    pub mime_type: String,
    /// Raw text, or text already extracted from a binary attachment.
    pub content: String,
}

/// One unit of source content tracked for indexing.
///
/// Owned by its collection; `collection` is a back-reference by name only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub title: String,
    pub language: String,
    pub url: String,
    pub mime_type: String,
    pub content: String,
    pub status: IndexStatus,
    /// Cause of the most recent exhausted indexing attempt.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A fresh, unindexed document with no content yet.
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            collection: collection.to_string(),
            title: String::new(),
            language: String::new(),
            url: String::new(),
            mime_type: "text/plain".to_string(),
            content: String::new(),
            status: IndexStatus::Unindexed,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Replace the content snapshot with what storage returned.
    pub fn apply_content(&mut self, loaded: DocumentContent) {
        self.title = loaded.title;
        self.language = loaded.language;
        self.url = loaded.url;
        self.mime_type = loaded.mime_type;
        self.content = loaded.content;
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: IndexStatus) {
        self.status = status;
        if status != IndexStatus::Failed {
            self.last_error = None;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, cause: &str) {
        self.status = IndexStatus::Failed;
        self.last_error = Some(cause.to_string());
        self.updated_at = Utc::now();
    }

    /// Stable storage key: hex SHA-256 of the document id.
    ///
    /// Document ids are free-form (URLs, paths); the key is safe to use as
    /// a page or file name in backing storage.
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Named fields as an ordered list, for script and REST facades.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("collection", self.collection.clone()),
            ("title", self.title.clone()),
            ("language", self.language.clone()),
            ("url", self.url.clone()),
            ("mimetype", self.mime_type.clone()),
            ("content", self.content.clone()),
            ("status", self.status.to_string()),
        ]
    }
}

/// A bounded slice of a document's text.
///
/// Chunks are never mutated in place; a re-index replaces the whole set.
/// The embedding vector travels alongside the chunk (see
/// [`IndexStore::upsert_document`](crate::store::IndexStore::upsert_document)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Deterministic UUID derived from the document id and sequence index.
    pub id: String,
    pub document_id: String,
    /// 0-based position within the document.
    pub sequence_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    /// Character offset of the chunk within the document content.
    pub source_offset: Option<usize>,
    /// Length of the chunk in characters.
    pub length: Option<usize>,
}

/// State of an [`IndexTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexTaskState {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Queue bookkeeping for one pending or in-flight indexing attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexTask {
    pub collection: String,
    pub document_id: String,
    pub enqueued_at: DateTime<Utc>,
    /// Attempts made so far on this task (0 until the first pass starts).
    pub attempt: u32,
    pub state: IndexTaskState,
    /// Set when an enqueue arrived while the task was processing.
    pub superseded: bool,
    /// Document status before the enqueue marked it pending; restored
    /// when the pass is dropped without touching the index.
    pub prior_status: IndexStatus,
}

impl IndexTask {
    pub fn new(collection: &str, document_id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            enqueued_at: Utc::now(),
            attempt: 0,
            state: IndexTaskState::Pending,
            superseded: false,
            prior_status: IndexStatus::Unindexed,
        }
    }

    pub fn with_prior_status(mut self, status: IndexStatus) -> Self {
        self.prior_status = status;
        self
    }

    /// Whether the task counts against the one-live-task-per-document rule.
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            IndexTaskState::Pending | IndexTaskState::Processing
        )
    }
}
