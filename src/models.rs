//! Core data models shared by the indexer, the store, and the query path.
//!
//! These types represent the documents, chunks, persisted entries, and
//! search results that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A corpus file, read once per indexing pass.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path relative to the corpus root, always `/`-separated.
    pub relative_path: String,
    pub text: String,
}

/// A window of a document's text.
///
/// `start` and `end` are character offsets into the source text, so
/// `text == source.chars().skip(start).take(end - start)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Metadata persisted alongside every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source_file: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub indexed_at: DateTime<Utc>,
}

/// The persisted unit in the vector store.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    /// The chunk text, retained for result display.
    pub document: String,
    pub metadata: EntryMetadata,
}

/// Derive the stable entry id for a chunk of a document.
///
/// The relative path is the document identity, so files that share a name
/// in different directories get distinct ids, and re-indexing the same
/// chunk of the same file always targets the same id.
pub fn entry_id(relative_path: &str, chunk_index: usize) -> String {
    format!("{}_{}", relative_path, chunk_index)
}

/// A single ranked hit returned to callers of `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source_file: String,
    pub text: String,
    /// Similarity in `[0, 1]`, higher is more similar.
    pub relevance: f32,
    pub chunk_index: usize,
}

/// Whether the connected collection holds anything yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotReady,
    Ready,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::NotReady => "not_ready",
            IndexStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: u64,
    pub status: IndexStatus,
}

impl IndexStats {
    pub fn from_count(total_chunks: u64) -> Self {
        let status = if total_chunks == 0 {
            IndexStatus::NotReady
        } else {
            IndexStatus::Ready
        };
        Self {
            total_chunks,
            status,
        }
    }
}
