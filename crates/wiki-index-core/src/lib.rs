//! # wiki-index core
//!
//! Runtime-agnostic logic for the wiki index: document and chunk models,
//! collection access-control tiers, the deterministic chunker, the index
//! store abstraction, and the embedding client trait.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies.

pub mod acl;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;

pub use error::{IndexError, IndexResult};
