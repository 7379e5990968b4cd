//! # Wiki Index
//!
//! Asynchronous indexing pipeline for access-controlled wiki collections.
//!
//! Content-change notifications are deduplicated into an index queue; a
//! bounded-parallel worker loads each document, chunks it, embeds every
//! chunk, and atomically replaces the document's chunk set in a vector
//! index store. Queries are answered only from collections the caller may
//! use.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────────────┐   ┌─────────────┐
//! │ Change events│──▶│ IndexQueue │──▶│ Worker → Pipeline    │──▶│ IndexStore  │
//! │ / CLI sync   │   │ (dedup)    │   │ load·chunk·embed     │   │ mem / SQLite│
//! └──────────────┘   └────────────┘   └──────────────────────┘   └──────┬──────┘
//!                                                                       │
//!                          ┌────────────────────┐                       │
//!                          │ query (ACL-scoped) │◀──────────────────────┘
//!                          └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`embedding`] | Embedding clients and the model table |
//! | [`storage`] | Document storage collaborator |
//! | [`identity`] | Group membership |
//! | [`collection`] | Collections and their documents |
//! | [`registry`] | Collection registry |
//! | [`queue`] | Index queue and worker |
//! | [`pipeline`] | Per-document indexing pass |
//! | [`retry`] | Backoff policy |
//! | [`events`] | Content-change notifications |
//! | [`search`] | Query facade |
//! | [`sqlite_store`] | Persistent index store |
//! | [`service`] | Wiring facade |
//!
//! Runtime-agnostic types (models, ACL, chunker, store trait) live in
//! [`wiki_index_core`].

pub mod collection;
pub mod config;
pub mod db;
pub mod embedding;
pub mod events;
pub mod identity;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod search;
pub mod service;
pub mod sqlite_store;
pub mod stats;
pub mod storage;
