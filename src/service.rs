//! Query service.
//!
//! [`QueryService`] answers `search` and `stats` against an embedding
//! provider and a vector store. It is built once when the daemon (or a
//! one-shot CLI query) starts and then shared read-only behind an `Arc`.
//!
//! Raw store distances are turned into a relevance score by a
//! [`Normalization`]. The default, [`Normalization::HalfDistance`], maps
//! cosine distance `d ∈ [0, 2]` onto `1 − d/2 ∈ [0, 1]`.

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::models::{IndexStats, SearchResult};
use crate::store::VectorStore;

/// Maps a store distance to a relevance score. Both variants are strictly
/// decreasing on `[0, 2]`, so ranking order is preserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `clamp(1 − d/2, 0, 1)`. Exact for cosine distance.
    #[default]
    HalfDistance,
    /// `1 / (1 + d)`.
    Reciprocal,
}

impl Normalization {
    pub fn relevance(&self, distance: f32) -> f32 {
        let d = distance.max(0.0);
        match self {
            Normalization::HalfDistance => (1.0 - d / 2.0).clamp(0.0, 1.0),
            Normalization::Reciprocal => 1.0 / (1.0 + d),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The model or the store is not loaded yet.
    #[error("search service not initialized")]
    NotReady,
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct QueryService {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    normalization: Normalization,
}

impl QueryService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        normalization: Normalization,
    ) -> Self {
        Self {
            provider,
            store,
            normalization,
        }
    }

    /// The `k` most relevant chunks for `query`, most relevant first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        if k < 1 {
            return Err(ServiceError::InvalidRequest(
                "n_results must be at least 1".to_string(),
            ));
        }

        let vector = embed_query(self.provider.as_ref(), query).await?;
        let hits = self.store.query(&vector, k).await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                relevance: self.normalization.relevance(hit.distance),
                source_file: hit.metadata.source_file,
                chunk_index: hit.metadata.chunk_index,
                text: hit.document,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<IndexStats, ServiceError> {
        let total = self.store.count().await?;
        Ok(IndexStats::from_count(total))
    }
}
