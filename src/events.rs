//! Content-change notifications.
//!
//! Producers send [`ChangeEvent`]s over an mpsc channel; the listener task
//! turns each into a collection notification. A notification means
//! "re-evaluate this document": created and updated documents are queued
//! for a pass, deleted ones are dropped and purged from the index.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wiki_index_core::IndexResult;

use crate::registry::CollectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub document_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(collection: &str, document_id: &str, kind: ChangeKind) -> Self {
        Self {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            kind,
        }
    }

    pub fn updated(collection: &str, document_id: &str) -> Self {
        Self::new(collection, document_id, ChangeKind::Updated)
    }
}

/// Apply one event. Events for unknown collections are ignored.
pub async fn handle_event(registry: &CollectionRegistry, event: &ChangeEvent) -> IndexResult<()> {
    let collection = match registry.find(&event.collection).await {
        Some(c) => c,
        None => {
            tracing::warn!(collection = %event.collection, document = %event.document_id, "change event for unknown collection");
            return Ok(());
        }
    };

    match event.kind {
        ChangeKind::Created | ChangeKind::Updated => {
            let outcome = collection.notify(&event.document_id)?;
            tracing::debug!(collection = %event.collection, document = %event.document_id, ?outcome, "change event");
        }
        ChangeKind::Deleted => {
            let removed = collection.purge_document(&event.document_id).await?;
            tracing::info!(collection = %event.collection, document = %event.document_id, chunks = removed, "document deleted in storage");
        }
    }
    Ok(())
}

/// Consume events until every sender is dropped.
pub fn spawn_listener(
    registry: Arc<CollectionRegistry>,
    mut events: mpsc::Receiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = handle_event(&registry, &event).await {
                tracing::error!(collection = %event.collection, document = %event.document_id, error = %e, "failed to apply change event");
            }
        }
        tracing::debug!("change event listener stopped");
    })
}
