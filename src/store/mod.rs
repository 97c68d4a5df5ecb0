//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the indexer and the query
//! service need from persistent storage: keyed upsert, nearest-neighbor
//! query, a count, and metadata enumeration. Two backends are provided:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`SqliteStore`] | [`sqlite`] | persistent, one file per archive |
//! | [`InMemoryStore`] | [`memory`] | tests and embedding in other tools |
//!
//! Distances are cosine distances (`1 − cos θ`, in `[0, 2]`), and query
//! results are ordered by ascending distance.
//!
//! Implementations must be `Send + Sync`; the daemon shares one handle
//! across all concurrent requests and only ever reads through it.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EntryMetadata, IndexEntry};

/// One ranked hit from [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
    pub distance: f32,
}

/// Id and metadata of a stored entry, without vector or text.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub id: String,
    pub metadata: EntryMetadata,
}

/// Selects entries by metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    All,
    SourceFile(String),
}

impl MetadataFilter {
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        match self {
            MetadataFilter::All => true,
            MetadataFilter::SourceFile(path) => metadata.source_file == *path,
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert entries, replacing any existing entry with the same id.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// The `k` entries nearest to `vector`, by ascending distance.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>>;

    /// Total number of entries in the collection.
    async fn count(&self) -> Result<u64>;

    /// All entries whose metadata matches `filter`.
    async fn enumerate(&self, filter: &MetadataFilter) -> Result<Vec<EntryRecord>>;

    /// Remove entries whose metadata matches `filter`; returns how many went.
    async fn delete(&self, filter: &MetadataFilter) -> Result<u64>;

    /// Atomically swap every entry of `source_file` for `entries`. On error
    /// the document's previous entries are left untouched.
    async fn replace(&self, source_file: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Record or check the embedding model this collection is built with.
    ///
    /// Backends that cannot persist the binding accept any model.
    async fn ensure_model(&self, _model: &str, _dims: usize) -> Result<()> {
        Ok(())
    }
}

/// Sort hits by ascending distance, ties by id, and keep the first `k`.
pub(crate) fn rank_hits(mut hits: Vec<StoreHit>, k: usize) -> Vec<StoreHit> {
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
