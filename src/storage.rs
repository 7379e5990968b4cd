//! Document storage collaborator.
//!
//! The pipeline never owns document content; it asks a [`DocumentStorage`]
//! for the current snapshot at the start of every pass. Two backends:
//!
//! - [`FsDocumentStorage`]: `<root>/<collection>/<document-id>` files.
//!   Document ids are paths relative to the collection directory.
//! - [`InMemoryDocumentStorage`]: a map, for tests and embedding callers.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use walkdir::WalkDir;

use wiki_index_core::models::DocumentContent;
use wiki_index_core::{IndexError, IndexResult};

use crate::config::StorageConfig;

/// Source of document content.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Current content of one document.
    ///
    /// Fails with [`IndexError::Retrieval`] when the document cannot be read.
    async fn load_content(&self, collection: &str, document_id: &str)
        -> IndexResult<DocumentContent>;

    /// Create or overwrite a document.
    async fn save_document(
        &self,
        collection: &str,
        document_id: &str,
        content: &DocumentContent,
    ) -> IndexResult<()>;

    /// Every document id stored for a collection, sorted.
    async fn list_documents(&self, collection: &str) -> IndexResult<Vec<String>>;
}

fn retrieval(collection: &str, document_id: &str, reason: impl std::fmt::Display) -> IndexError {
    IndexError::Retrieval {
        collection: collection.to_string(),
        document_id: document_id.to_string(),
        reason: reason.to_string(),
    }
}

// ============ Filesystem ============

/// Filesystem-backed storage.
pub struct FsDocumentStorage {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl FsDocumentStorage {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    /// Directory of a collection. The name must be one plain path segment.
    fn collection_dir(&self, collection: &str) -> IndexResult<PathBuf> {
        let mut components = Path::new(collection).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(collection)),
            _ => Err(retrieval(collection, "*", "invalid collection name")),
        }
    }

    /// Resolve a document path, refusing ids that escape the collection.
    fn document_path(&self, collection: &str, document_id: &str) -> IndexResult<PathBuf> {
        let dir = self.collection_dir(collection)?;
        let relative = Path::new(document_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if document_id.is_empty() || escapes {
            return Err(retrieval(collection, document_id, "invalid document path"));
        }
        Ok(dir.join(relative))
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        _ => "text/plain",
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn load_content(
        &self,
        collection: &str,
        document_id: &str,
    ) -> IndexResult<DocumentContent> {
        let path = self.document_path(collection, document_id)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| retrieval(collection, document_id, e))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| document_id.to_string());
        Ok(DocumentContent {
            title,
            language: String::new(),
            url: format!("file://{}", path.display()),
            mime_type: mime_type_for(&path).to_string(),
            content,
        })
    }

    async fn save_document(
        &self,
        collection: &str,
        document_id: &str,
        content: &DocumentContent,
    ) -> IndexResult<()> {
        let path = self.document_path(collection, document_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| retrieval(collection, document_id, e))?;
        }
        tokio::fs::write(&path, &content.content)
            .await
            .map_err(|e| retrieval(collection, document_id, e))
    }

    async fn list_documents(&self, collection: &str) -> IndexResult<Vec<String>> {
        let dir = self.collection_dir(collection)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| retrieval(collection, "*", e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();
            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            ids.push(rel_str);
        }

        ids.sort();
        Ok(ids)
    }
}

// ============ In-memory ============

/// Map-backed storage. A document registered with
/// [`fail`](InMemoryDocumentStorage::fail) raises a retrieval error.
#[derive(Default)]
pub struct InMemoryDocumentStorage {
    docs: RwLock<BTreeMap<(String, String), Result<DocumentContent, String>>>,
}

impl InMemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a plain-text document.
    pub fn put(&self, collection: &str, document_id: &str, text: &str) {
        self.insert(
            collection,
            document_id,
            Ok(DocumentContent {
                title: document_id.to_string(),
                language: "en".to_string(),
                url: format!("wiki://{}/{}", collection, document_id),
                mime_type: "text/plain".to_string(),
                content: text.to_string(),
            }),
        );
    }

    /// Make the document unreadable.
    pub fn fail(&self, collection: &str, document_id: &str, reason: &str) {
        self.insert(collection, document_id, Err(reason.to_string()));
    }

    pub fn remove(&self, collection: &str, document_id: &str) {
        if let Ok(mut docs) = self.docs.write() {
            docs.remove(&(collection.to_string(), document_id.to_string()));
        }
    }

    fn insert(
        &self,
        collection: &str,
        document_id: &str,
        value: Result<DocumentContent, String>,
    ) {
        if let Ok(mut docs) = self.docs.write() {
            docs.insert((collection.to_string(), document_id.to_string()), value);
        }
    }
}

#[async_trait]
impl DocumentStorage for InMemoryDocumentStorage {
    async fn load_content(
        &self,
        collection: &str,
        document_id: &str,
    ) -> IndexResult<DocumentContent> {
        let docs = self
            .docs
            .read()
            .map_err(|_| retrieval(collection, document_id, "storage lock poisoned"))?;
        match docs.get(&(collection.to_string(), document_id.to_string())) {
            Some(Ok(content)) => Ok(content.clone()),
            Some(Err(reason)) => Err(retrieval(collection, document_id, reason)),
            None => Err(retrieval(collection, document_id, "no such document")),
        }
    }

    async fn save_document(
        &self,
        collection: &str,
        document_id: &str,
        content: &DocumentContent,
    ) -> IndexResult<()> {
        self.insert(collection, document_id, Ok(content.clone()));
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> IndexResult<Vec<String>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| retrieval(collection, "*", "storage lock poisoned"))?;
        Ok(docs
            .keys()
            .filter(|(coll, _)| coll == collection)
            .map(|(_, id)| id.clone())
            .collect())
    }
}
