//! Corpus indexing.
//!
//! Coordinates the write path: corpus discovery → chunking → embedding →
//! vector store upsert. The indexer is the only writer to the store; do not
//! run two indexing passes against the same collection at once.
//!
//! # Modes
//!
//! - **Full** re-indexes every discovered document. Each document's old
//!   entries are swapped for the new ones in one store write, so running
//!   twice never duplicates entries, a shortened document leaves no stale
//!   tail, and a failed write keeps the previous entries.
//! - **Incremental** skips any document whose relative path already appears
//!   as a `source_file` in the store. This is a file-level check, not a
//!   content hash: edits to an already-indexed file are not picked up until
//!   the next full run.
//!
//! Per-document failures (unreadable file, invalid UTF-8, embedding error)
//! are logged, recorded in the [`IndexReport`], and do not stop the run.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, CorpusConfig};
use crate::embedding::EmbeddingProvider;
use crate::models::{entry_id, EntryMetadata, IndexEntry, SourceDocument};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::store::{MetadataFilter, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub mode: IndexMode,
    /// Discover and chunk only; nothing is embedded or written.
    pub dry_run: bool,
}

/// A document that could not be indexed, and why.
#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub source_file: String,
    pub error: String,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub discovered: usize,
    pub processed: usize,
    pub skipped_existing: usize,
    pub skipped_empty: usize,
    pub failed: Vec<IndexFailure>,
    pub chunks_indexed: usize,
    pub dry_run: bool,
}

/// A corpus file found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub relative_path: String,
}

enum DocumentOutcome {
    Indexed(usize),
    Empty,
}

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    chunk_size: usize,
    overlap: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        // Fail before touching any document rather than on the first one.
        chunk_text("", chunking.chunk_size, chunking.overlap)?;

        Ok(Self {
            store,
            provider,
            chunk_size: chunking.chunk_size,
            overlap: chunking.overlap,
        })
    }

    /// Index the corpus described by `corpus`.
    ///
    /// Returns an error only for run-level problems (missing corpus root,
    /// store unreachable, model mismatch). Document-level problems end up
    /// in [`IndexReport::failed`].
    pub async fn run(
        &self,
        corpus: &CorpusConfig,
        options: IndexOptions,
        progress: &dyn IndexProgressReporter,
    ) -> Result<IndexReport> {
        let mut report = IndexReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        progress.report(IndexProgressEvent::Discovering {
            root: corpus.root.display().to_string(),
        });
        let (files, walk_failures) = discover_documents(corpus)?;
        report.discovered = files.len();
        report.failed.extend(walk_failures);

        if files.is_empty() {
            tracing::warn!(root = %corpus.root.display(), "no documents found under corpus root");
            return Ok(report);
        }
        tracing::info!(count = files.len(), "discovered documents");

        if !options.dry_run {
            self.store
                .ensure_model(self.provider.model_name(), self.provider.dims())
                .await?;
        }

        let already_indexed: HashSet<String> = if options.mode == IndexMode::Incremental {
            let existing: HashSet<String> = self
                .store
                .enumerate(&MetadataFilter::All)
                .await?
                .into_iter()
                .map(|r| r.metadata.source_file)
                .collect();
            tracing::info!(count = existing.len(), "skipping already indexed files");
            existing
        } else {
            HashSet::new()
        };

        let (pending, existing): (Vec<DiscoveredFile>, Vec<DiscoveredFile>) = files
            .into_iter()
            .partition(|f| !already_indexed.contains(&f.relative_path));
        report.skipped_existing = existing.len();

        let total = pending.len() as u64;
        for (i, file) in pending.iter().enumerate() {
            match self.index_document(file, options).await {
                Ok(DocumentOutcome::Indexed(chunks)) => {
                    tracing::debug!(file = %file.relative_path, chunks, "indexed document");
                    report.processed += 1;
                    report.chunks_indexed += chunks;
                }
                Ok(DocumentOutcome::Empty) => {
                    tracing::debug!(file = %file.relative_path, "skipping empty document");
                    report.skipped_empty += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %file.relative_path, error = %format!("{:#}", e), "failed to index document");
                    report.failed.push(IndexFailure {
                        source_file: file.relative_path.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }

            progress.report(IndexProgressEvent::Indexing {
                n: i as u64 + 1,
                total,
                chunks: report.chunks_indexed as u64,
            });
        }

        tracing::info!(
            processed = report.processed,
            chunks = report.chunks_indexed,
            failed = report.failed.len(),
            "indexing complete"
        );
        Ok(report)
    }

    async fn index_document(
        &self,
        file: &DiscoveredFile,
        options: IndexOptions,
    ) -> Result<DocumentOutcome> {
        let document = read_document(file).await?;
        if document.text.trim().is_empty() {
            return Ok(DocumentOutcome::Empty);
        }

        let chunks = chunk_text(&document.text, self.chunk_size, self.overlap)?;
        if options.dry_run {
            return Ok(DocumentOutcome::Indexed(chunks.len()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .provider
            .embed(&texts)
            .await
            .context("embedding request failed")?;

        if vectors.len() != chunks.len() {
            bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        let dims = self.provider.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            bail!(
                "embedding provider returned a {}-dimensional vector, expected {}",
                bad.len(),
                dims
            );
        }

        let indexed_at = Utc::now();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                id: entry_id(&document.relative_path, chunk.index),
                vector,
                document: chunk.text,
                metadata: EntryMetadata {
                    source_file: document.relative_path.clone(),
                    chunk_index: chunk.index,
                    total_chunks: chunk.total,
                    indexed_at,
                },
            })
            .collect();

        match options.mode {
            IndexMode::Full => self.store.replace(&document.relative_path, &entries).await?,
            IndexMode::Incremental => self.store.upsert(&entries).await?,
        }

        Ok(DocumentOutcome::Indexed(entries.len()))
    }
}

async fn read_document(file: &DiscoveredFile) -> Result<SourceDocument> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .with_context(|| format!("failed to read {}", file.path.display()))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| anyhow!("{} is not valid UTF-8: {}", file.relative_path, e))?;
    Ok(SourceDocument {
        relative_path: file.relative_path.clone(),
        text,
    })
}

/// Walk the corpus root and return matching files sorted by relative path,
/// plus any directory entries that could not be read.
pub fn discover_documents(
    corpus: &CorpusConfig,
) -> Result<(Vec<DiscoveredFile>, Vec<IndexFailure>)> {
    let root = &corpus.root;
    if !root.is_dir() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let mut failures = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_else(|| root.display().to_string());
                tracing::warn!(path = %path, error = %e, "cannot read corpus entry");
                failures.push(IndexFailure {
                    source_file: path,
                    error: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_path(root, entry.path());

        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            continue;
        }

        files.push(DiscoveredFile {
            path: entry.path().to_path_buf(),
            relative_path: rel,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok((files, failures))
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::progress::NoProgress;
    use crate::store::{EntryRecord, InMemoryStore, StoreHit};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Delegates to an in-memory store; writes fail while `reject_writes`
    /// is set, without touching the stored entries.
    struct FlakyStore {
        inner: InMemoryStore,
        reject_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.reject_writes.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
            self.check()?;
            self.inner.upsert(entries).await
        }
        async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<StoreHit>> {
            self.inner.query(vector, k).await
        }
        async fn count(&self) -> Result<u64> {
            self.inner.count().await
        }
        async fn enumerate(&self, filter: &MetadataFilter) -> Result<Vec<EntryRecord>> {
            self.inner.enumerate(filter).await
        }
        async fn delete(&self, filter: &MetadataFilter) -> Result<u64> {
            self.inner.delete(filter).await
        }
        async fn replace(&self, source_file: &str, entries: &[IndexEntry]) -> Result<()> {
            self.check()?;
            self.inner.replace(source_file, entries).await
        }
    }

    fn corpus(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    fn indexer(store: Arc<InMemoryStore>, chunk_size: usize, overlap: usize) -> Indexer {
        Indexer::new(
            store,
            Arc::new(HashProvider::new(32)),
            &ChunkingConfig {
                chunk_size,
                overlap,
            },
        )
        .unwrap()
    }

    const FULL: IndexOptions = IndexOptions {
        mode: IndexMode::Full,
        dry_run: false,
    };
    const INCREMENTAL: IndexOptions = IndexOptions {
        mode: IndexMode::Incremental,
        dry_run: false,
    };

    #[test]
    fn test_discovery_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("2024/march")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("b.md"), "b").unwrap();
        fs::write(tmp.path().join("2024/march/a.md"), "a").unwrap();
        fs::write(tmp.path().join("notes.txt"), "txt").unwrap();
        fs::write(tmp.path().join(".git/HEAD.md"), "x").unwrap();

        let (files, failures) = discover_documents(&corpus(tmp.path())).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["2024/march/a.md", "b.md"]);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = discover_documents(&corpus(&tmp.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let result = Indexer::new(
            store,
            Arc::new(HashProvider::new(8)),
            &ChunkingConfig {
                chunk_size: 10,
                overlap: 10,
            },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_full_index_builds_entries_with_metadata() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("long.md"), "word ".repeat(1000)).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let report = indexer(store.clone(), 2000, 200)
            .run(&corpus(tmp.path()), FULL, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.chunks_indexed, 3);

        let records = store.enumerate(&MetadataFilter::All).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["long.md_0", "long.md_1", "long.md_2"]);
        assert!(records.iter().all(|r| r.metadata.total_chunks == 3));
        assert!(records.iter().all(|r| r.metadata.source_file == "long.md"));
    }

    #[tokio::test]
    async fn test_full_reindex_does_not_duplicate_or_leave_stale_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.md");
        fs::write(&path, "x".repeat(50)).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let idx = indexer(store.clone(), 10, 2);
        idx.run(&corpus(tmp.path()), FULL, &NoProgress).await.unwrap();
        let first = store.count().await.unwrap();
        idx.run(&corpus(tmp.path()), FULL, &NoProgress).await.unwrap();
        assert_eq!(store.count().await.unwrap(), first);

        fs::write(&path, "x".repeat(12)).unwrap();
        idx.run(&corpus(tmp.path()), FULL, &NoProgress).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_entries() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("doc.md"), "x".repeat(50)).unwrap();

        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            reject_writes: AtomicBool::new(false),
        });
        let idx = Indexer::new(
            store.clone(),
            Arc::new(HashProvider::new(32)),
            &ChunkingConfig {
                chunk_size: 10,
                overlap: 2,
            },
        )
        .unwrap();
        idx.run(&corpus(tmp.path()), FULL, &NoProgress).await.unwrap();
        let before = store.count().await.unwrap();
        assert!(before > 0);

        store.reject_writes.store(true, Ordering::SeqCst);
        let report = idx.run(&corpus(tmp.path()), FULL, &NoProgress).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source_file, "doc.md");
        assert_eq!(store.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_incremental_second_run_adds_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "alpha conversation").unwrap();
        fs::write(tmp.path().join("b.md"), "beta conversation").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let idx = indexer(store.clone(), 100, 10);

        let first = idx.run(&corpus(tmp.path()), INCREMENTAL, &NoProgress).await.unwrap();
        assert_eq!(first.processed, 2);
        let count = store.count().await.unwrap();

        let second = idx.run(&corpus(tmp.path()), INCREMENTAL, &NoProgress).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(store.count().await.unwrap(), count);

        fs::write(tmp.path().join("c.md"), "gamma conversation").unwrap();
        let third = idx.run(&corpus(tmp.path()), INCREMENTAL, &NoProgress).await.unwrap();
        assert_eq!(third.processed, 1);
        assert_eq!(third.skipped_existing, 2);
    }

    #[tokio::test]
    async fn test_empty_and_undecodable_documents_do_not_abort() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blank.md"), "   \n\t\n").unwrap();
        fs::write(tmp.path().join("binary.md"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();
        fs::write(tmp.path().join("good.md"), "a perfectly fine note").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let report = indexer(store.clone(), 100, 10)
            .run(&corpus(tmp.path()), FULL, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.discovered, 3);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source_file, "binary.md");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "y".repeat(25)).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let report = indexer(store.clone(), 10, 0)
            .run(
                &corpus(tmp.path()),
                IndexOptions {
                    mode: IndexMode::Full,
                    dry_run: true,
                },
                &NoProgress,
            )
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.chunks_indexed, 3);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
