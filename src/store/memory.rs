//! In-memory [`VectorStore`] for tests and embedding.
//!
//! Entries live in a `BTreeMap` keyed by id behind a `std::sync::RwLock`.
//! Queries are a brute-force cosine scan.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::IndexEntry;

use super::{rank_hits, EntryRecord, MetadataFilter, StoreHit, VectorStore};

pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        for entry in entries {
            stored.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>> {
        let stored = self.entries.read().map_err(poisoned)?;
        let hits = stored
            .values()
            .map(|entry| StoreHit {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(vector, &entry.vector),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().map_err(poisoned)?.len() as u64)
    }

    async fn enumerate(&self, filter: &MetadataFilter) -> Result<Vec<EntryRecord>> {
        let stored = self.entries.read().map_err(poisoned)?;
        Ok(stored
            .values()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| EntryRecord {
                id: e.id.clone(),
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<u64> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, e| !filter.matches(&e.metadata));
        Ok((before - stored.len()) as u64)
    }

    async fn replace(&self, source_file: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        stored.retain(|_, e| e.metadata.source_file != source_file);
        for entry in entries {
            stored.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;
    use chrono::Utc;

    fn entry(source: &str, index: usize, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: crate::models::entry_id(source, index),
            vector,
            document: format!("{} chunk {}", source, index),
            metadata: EntryMetadata {
                source_file: source.to_string(),
                chunk_index: index,
                total_chunks: 2,
                indexed_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_same_id_overwrites() {
        let store = InMemoryStore::new();
        store.upsert(&[entry("a.md", 0, vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[entry("a.md", 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let hits = store.query(&[0.0, 1.0], 1).await.unwrap();
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_orders_by_ascending_distance() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                entry("far.md", 0, vec![-1.0, 0.0]),
                entry("near.md", 0, vec![1.0, 0.1]),
                entry("mid.md", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 3).await.unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.metadata.source_file.as_str()).collect();
        assert_eq!(order, vec!["near.md", "mid.md", "far.md"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        assert_eq!(store.query(&[1.0, 0.0], 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enumerate_and_delete_by_source() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                entry("a.md", 0, vec![1.0]),
                entry("a.md", 1, vec![1.0]),
                entry("b.md", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        let a = store
            .enumerate(&MetadataFilter::SourceFile("a.md".to_string()))
            .await
            .unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(store.enumerate(&MetadataFilter::All).await.unwrap().len(), 3);

        let removed = store
            .delete(&MetadataFilter::SourceFile("a.md".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_drops_stale_chunks_of_that_file_only() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                entry("a.md", 0, vec![1.0]),
                entry("a.md", 1, vec![1.0]),
                entry("b.md", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        store.replace("a.md", &[entry("a.md", 0, vec![0.5])]).await.unwrap();

        let ids: Vec<String> = store
            .enumerate(&MetadataFilter::All)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a.md_0", "b.md_0"]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryStore::new();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.query(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
