//! Query facade.
//!
//! Results are restricted to the collections the principal may `use`.
//! Text queries are embedded once per embedding model in play, since
//! collections indexed with different models live in different vector
//! spaces; each model's hits come only from its own collections and are
//! merged by score.

use std::collections::{BTreeMap, BTreeSet};

use wiki_index_core::acl::Action;
use wiki_index_core::store::{rank, QueryFilter, ScoredChunk};
use wiki_index_core::IndexResult;

use crate::registry::CollectionRegistry;
use crate::retry;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Text(String),
    Vector(Vec<f32>),
}

/// Nearest chunks across every collection `principal` may use.
pub async fn query(
    registry: &CollectionRegistry,
    principal: &str,
    input: &QueryInput,
    k: usize,
) -> IndexResult<Vec<ScoredChunk>> {
    search(registry, principal, input, k, QueryFilter::all()).await
}

/// Like [`query`], limited to the named collections.
pub async fn query_collections(
    registry: &CollectionRegistry,
    principal: &str,
    input: &QueryInput,
    k: usize,
    collections: &[&str],
) -> IndexResult<Vec<ScoredChunk>> {
    search(
        registry,
        principal,
        input,
        k,
        QueryFilter::collections(collections.iter().copied()),
    )
    .await
}

async fn search(
    registry: &CollectionRegistry,
    principal: &str,
    input: &QueryInput,
    k: usize,
    filter: QueryFilter,
) -> IndexResult<Vec<ScoredChunk>> {
    let allowed = registry.names_allowing(principal, Action::Query).await;
    let visible: BTreeSet<String> = allowed
        .into_iter()
        .filter(|name| filter.admits(name))
        .collect();
    if k == 0 || visible.is_empty() {
        return Ok(Vec::new());
    }

    let ctx = registry.context();
    match input {
        QueryInput::Vector(vector) => {
            let filter = filter.with_allowed(visible);
            ctx.store.query(vector, k, &filter).await
        }
        QueryInput::Text(text) => {
            let mut by_model: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for name in visible {
                if let Some(collection) = registry.find(&name).await {
                    let model = collection.settings()?.embedding_model;
                    by_model.entry(model).or_default().insert(name);
                }
            }

            let mut hits = Vec::new();
            for (model, names) in by_model {
                let client = ctx.models.get(&model)?;
                let vector =
                    retry::with_timeout(ctx.call_timeout, "query embed", client.embed(text))
                        .await?;
                let filter = QueryFilter::all().with_allowed(names);
                hits.extend(ctx.store.query(&vector, k, &filter).await?);
            }
            rank(&mut hits, k);
            tracing::debug!(principal, hits = hits.len(), "query served");
            Ok(hits)
        }
    }
}
