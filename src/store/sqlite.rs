//! SQLite-backed [`VectorStore`].
//!
//! A single `entries` table holds every collection, keyed by
//! `(collection, id)`, so upserts are idempotent by construction. Vectors
//! are stored as little-endian f32 BLOBs; queries scan the collection and
//! rank by cosine distance in Rust.
//!
//! The `collections` table records which embedding model a collection was
//! built with, so indexing into it with a different model fails loudly
//! instead of mixing incompatible vectors.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{EntryMetadata, IndexEntry};

use super::{rank_hits, EntryRecord, MetadataFilter, StoreHit, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and make sure the
    /// schema and the named collection exist.
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open vector store: {}", path.display()))?;

        run_migrations(&pool).await?;

        sqlx::query(
            "INSERT OR IGNORE INTO collections (name, model, dims, created_at) VALUES (?, NULL, NULL, ?)",
        )
        .bind(collection)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            model TEXT,
            dims INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            source_file TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            indexed_at TEXT NOT NULL,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(collection, source_file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn parse_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<EntryMetadata> {
    let indexed_at: String = row.get("indexed_at");
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .with_context(|| format!("Invalid indexed_at timestamp: {}", indexed_at))?
        .with_timezone(&Utc);
    let chunk_index: i64 = row.get("chunk_index");
    let total_chunks: i64 = row.get("total_chunks");

    Ok(EntryMetadata {
        source_file: row.get("source_file"),
        chunk_index: chunk_index as usize,
        total_chunks: total_chunks as usize,
        indexed_at,
    })
}

async fn upsert_entry(conn: &mut SqliteConnection, collection: &str, e: &IndexEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO entries (collection, id, source_file, chunk_index, total_chunks,
                             indexed_at, document, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(collection, id) DO UPDATE SET
            source_file = excluded.source_file,
            chunk_index = excluded.chunk_index,
            total_chunks = excluded.total_chunks,
            indexed_at = excluded.indexed_at,
            document = excluded.document,
            embedding = excluded.embedding
        "#,
    )
    .bind(collection)
    .bind(&e.id)
    .bind(&e.metadata.source_file)
    .bind(e.metadata.chunk_index as i64)
    .bind(e.metadata.total_chunks as i64)
    .bind(e.metadata.indexed_at.to_rfc3339())
    .bind(&e.document)
    .bind(vec_to_blob(&e.vector))
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            upsert_entry(&mut tx, &self.collection, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_file, chunk_index, total_chunks, indexed_at, document, embedding
            FROM entries
            WHERE collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            hits.push(StoreHit {
                id: row.get("id"),
                document: row.get("document"),
                metadata: parse_metadata(row)?,
                distance: cosine_distance(vector, &blob_to_vec(&blob)),
            });
        }

        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn enumerate(&self, filter: &MetadataFilter) -> Result<Vec<EntryRecord>> {
        let rows = match filter {
            MetadataFilter::All => {
                sqlx::query(
                    r#"
                    SELECT id, source_file, chunk_index, total_chunks, indexed_at
                    FROM entries
                    WHERE collection = ?
                    ORDER BY source_file, chunk_index
                    "#,
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
            MetadataFilter::SourceFile(path) => {
                sqlx::query(
                    r#"
                    SELECT id, source_file, chunk_index, total_chunks, indexed_at
                    FROM entries
                    WHERE collection = ? AND source_file = ?
                    ORDER BY chunk_index
                    "#,
                )
                .bind(&self.collection)
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(EntryRecord {
                    id: row.get("id"),
                    metadata: parse_metadata(row)?,
                })
            })
            .collect()
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<u64> {
        let result = match filter {
            MetadataFilter::All => {
                sqlx::query("DELETE FROM entries WHERE collection = ?")
                    .bind(&self.collection)
                    .execute(&self.pool)
                    .await?
            }
            MetadataFilter::SourceFile(path) => {
                sqlx::query("DELETE FROM entries WHERE collection = ? AND source_file = ?")
                    .bind(&self.collection)
                    .bind(path)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn replace(&self, source_file: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE collection = ? AND source_file = ?")
            .bind(&self.collection)
            .bind(source_file)
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            upsert_entry(&mut tx, &self.collection, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_model(&self, model: &str, dims: usize) -> Result<()> {
        let row = sqlx::query("SELECT model, dims FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        let bound_model: Option<String> = row.get("model");
        let bound_dims: Option<i64> = row.get("dims");

        match (bound_model, bound_dims) {
            (Some(m), Some(d)) if m == model && d as usize == dims => Ok(()),
            (Some(m), Some(d)) => bail!(
                "Collection '{}' was indexed with model '{}' ({} dims), not '{}' ({} dims)",
                self.collection,
                m,
                d,
                model,
                dims
            ),
            _ => {
                sqlx::query("UPDATE collections SET model = ?, dims = ? WHERE name = ?")
                    .bind(model)
                    .bind(dims as i64)
                    .bind(&self.collection)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    }
}
