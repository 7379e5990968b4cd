//! Collection registry: the name → [`Collection`] table.
//!
//! The table is guarded by one async `RwLock`: reads (`get_collection`,
//! `list_collections`) run concurrently, create/delete are exclusive.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use wiki_index_core::acl::{authorize, Action, CollectionAcl};
use wiki_index_core::chunk::ChunkingPolicy;
use wiki_index_core::{IndexError, IndexResult};

use crate::collection::{Collection, CollectionSettings, IndexContext};
use crate::config::{ChunkingConfig, CollectionConfig};

pub struct CollectionRegistry {
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
    ctx: IndexContext,
}

impl CollectionRegistry {
    pub fn new(ctx: IndexContext) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            ctx,
        }
    }

    pub fn context(&self) -> &IndexContext {
        &self.ctx
    }

    /// Create a collection.
    ///
    /// Fails with [`IndexError::Configuration`] for an empty name, an
    /// invalid chunking policy, or an unknown embedding model, and with
    /// [`IndexError::DuplicateName`] if the name is taken.
    pub async fn create_collection(
        &self,
        name: &str,
        acl: CollectionAcl,
        chunking: ChunkingPolicy,
        embedding_model: &str,
    ) -> IndexResult<Arc<Collection>> {
        if name.trim().is_empty() {
            return Err(IndexError::Configuration(
                "collection name must not be empty".to_string(),
            ));
        }
        chunking.validate()?;
        self.ctx.models.get(embedding_model)?;

        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(IndexError::DuplicateName(name.to_string()));
        }

        let collection = Arc::new(Collection::new(
            name,
            CollectionSettings {
                acl,
                chunking,
                embedding_model: embedding_model.to_string(),
            },
            self.ctx.clone(),
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        tracing::info!(collection = name, model = embedding_model, "collection created");
        Ok(collection)
    }

    pub async fn get_collection(&self, name: &str) -> IndexResult<Arc<Collection>> {
        self.find(name)
            .await
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))
    }

    pub async fn find(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().await.get(name).cloned()
    }

    /// All collections, ordered by name.
    pub async fn list_collections(&self) -> Vec<Arc<Collection>> {
        self.collections.read().await.values().cloned().collect()
    }

    /// Names of the collections `principal` may perform `action` on.
    pub async fn names_allowing(&self, principal: &str, action: Action) -> BTreeSet<String> {
        self.collections
            .read()
            .await
            .values()
            .filter(|c| c.allows(principal, action))
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Delete a collection and every chunk indexed for it.
    /// Returns the number of chunks removed.
    pub async fn delete_collection(&self, principal: &str, name: &str) -> IndexResult<usize> {
        let collection = {
            let mut collections = self.collections.write().await;
            let collection = collections
                .get(name)
                .cloned()
                .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))?;
            let settings = collection.settings()?;
            authorize(
                principal,
                name,
                &settings.acl,
                Action::DeleteCollection,
                self.ctx.groups.as_ref(),
            )?;
            collections.remove(name);
            collection
        };

        // In-flight passes see the flag and purge what they commit.
        collection.mark_deleted();
        let removed = self.ctx.store.delete_collection(name).await?;
        tracing::info!(collection = name, chunks = removed, "collection deleted");
        Ok(removed)
    }

    /// Create the collections listed in configuration, skipping (and
    /// logging) invalid ones. Returns how many were created.
    pub async fn load_from_config(
        &self,
        entries: &[CollectionConfig],
        defaults: &ChunkingConfig,
    ) -> usize {
        let mut loaded = 0;
        for entry in entries {
            match self
                .create_collection(
                    &entry.name,
                    entry.acl.clone(),
                    entry.policy(defaults),
                    &entry.embedding_model,
                )
                .await
            {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(collection = %entry.name, error = %e, "skipping collection");
                }
            }
        }
        tracing::info!(loaded, "collections loaded from config");
        loaded
    }

    /// Forget every collection. The index is left untouched.
    pub async fn clear(&self) {
        self.collections.write().await.clear();
    }
}
