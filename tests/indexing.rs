//! Indexing against the SQLite store with the hash embedder.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use archive_search::config::{ChunkingConfig, CorpusConfig};
use archive_search::embedding::HashProvider;
use archive_search::index::{IndexMode, IndexOptions, Indexer};
use archive_search::progress::NoProgress;
use archive_search::service::{Normalization, QueryService};
use archive_search::store::{MetadataFilter, SqliteStore, VectorStore};
use tempfile::TempDir;

fn corpus(root: &Path) -> CorpusConfig {
    CorpusConfig {
        root: root.to_path_buf(),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: vec![],
        follow_symlinks: false,
    }
}

fn chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 2000,
        overlap: 200,
    }
}

fn full() -> IndexOptions {
    IndexOptions {
        mode: IndexMode::Full,
        dry_run: false,
    }
}

fn write_corpus(root: &Path) {
    fs::create_dir_all(root.join("2023")).unwrap();
    fs::create_dir_all(root.join("2024")).unwrap();
    fs::write(
        root.join("2023/garden.md"),
        "We planned the vegetable garden: tomatoes, basil, and raised beds.",
    )
    .unwrap();
    fs::write(
        root.join("2024/move.md"),
        "The apartment move is scheduled for June. Boxes, movers, and the new lease.",
    )
    .unwrap();
    // Same file name in a different directory must not collide.
    fs::write(
        root.join("2024/garden.md"),
        "Second year of the garden. The tomatoes did better this time.",
    )
    .unwrap();
    fs::write(root.join("long.md"), "conversation ".repeat(385)).unwrap();
}

#[tokio::test]
async fn test_full_index_persists_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    write_corpus(&corpus_dir);
    let db = tmp.path().join("data/archive.sqlite");

    let store = Arc::new(SqliteStore::open(&db, "conversation_chunks").await.unwrap());
    let indexer = Indexer::new(store.clone(), Arc::new(HashProvider::new(64)), &chunking()).unwrap();

    let report = indexer.run(&corpus(&corpus_dir), full(), &NoProgress).await.unwrap();
    assert_eq!(report.discovered, 4);
    assert_eq!(report.processed, 4);
    assert!(report.failed.is_empty());
    // 5005 characters → 3 chunks, plus 3 single-chunk files
    assert_eq!(report.chunks_indexed, 6);
    assert_eq!(store.count().await.unwrap(), 6);

    indexer.run(&corpus(&corpus_dir), full(), &NoProgress).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 6);

    let gardens: Vec<String> = store
        .enumerate(&MetadataFilter::All)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.metadata.source_file.ends_with("garden.md"))
        .map(|r| r.id)
        .collect();
    assert_eq!(gardens, vec!["2023/garden.md_0", "2024/garden.md_0"]);
    store.close().await;

    // Reopen: the data survives the process.
    let reopened = SqliteStore::open(&db, "conversation_chunks").await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_incremental_picks_up_only_new_files() {
    let tmp = TempDir::new().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    write_corpus(&corpus_dir);
    let db = tmp.path().join("archive.sqlite");

    let store = Arc::new(SqliteStore::open(&db, "conversation_chunks").await.unwrap());
    let indexer = Indexer::new(store.clone(), Arc::new(HashProvider::new(64)), &chunking()).unwrap();
    let incremental = IndexOptions {
        mode: IndexMode::Incremental,
        dry_run: false,
    };

    indexer.run(&corpus(&corpus_dir), incremental, &NoProgress).await.unwrap();
    let before = store.count().await.unwrap();

    let again = indexer.run(&corpus(&corpus_dir), incremental, &NoProgress).await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped_existing, 4);
    assert_eq!(store.count().await.unwrap(), before);

    fs::write(corpus_dir.join("new.md"), "a brand new conversation").unwrap();
    let third = indexer.run(&corpus(&corpus_dir), incremental, &NoProgress).await.unwrap();
    assert_eq!(third.processed, 1);
    assert_eq!(store.count().await.unwrap(), before + 1);
}

#[tokio::test]
async fn test_model_mismatch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    write_corpus(&corpus_dir);
    let db = tmp.path().join("archive.sqlite");

    let store = Arc::new(SqliteStore::open(&db, "conversation_chunks").await.unwrap());
    Indexer::new(store.clone(), Arc::new(HashProvider::new(64)), &chunking())
        .unwrap()
        .run(&corpus(&corpus_dir), full(), &NoProgress)
        .await
        .unwrap();

    let err = Indexer::new(store.clone(), Arc::new(HashProvider::new(32)), &chunking())
        .unwrap()
        .run(&corpus(&corpus_dir), full(), &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("was indexed with model"));
}

#[tokio::test]
async fn test_indexed_archive_is_searchable() {
    let tmp = TempDir::new().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    write_corpus(&corpus_dir);

    let store = Arc::new(
        SqliteStore::open(&tmp.path().join("archive.sqlite"), "conversation_chunks")
            .await
            .unwrap(),
    );
    let provider = Arc::new(HashProvider::new(128));
    Indexer::new(store.clone(), provider.clone(), &chunking())
        .unwrap()
        .run(&corpus(&corpus_dir), full(), &NoProgress)
        .await
        .unwrap();

    let service = QueryService::new(provider, store, Normalization::HalfDistance);
    let results = service.search("apartment move movers lease", 3).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].source_file, "2024/move.md");
    assert!(results
        .windows(2)
        .all(|w| w[0].relevance >= w[1].relevance));
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.relevance)));
}

#[tokio::test]
async fn test_collections_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    write_corpus(&corpus_dir);
    let db = tmp.path().join("archive.sqlite");

    let a = Arc::new(SqliteStore::open(&db, "a").await.unwrap());
    Indexer::new(a.clone(), Arc::new(HashProvider::new(16)), &chunking())
        .unwrap()
        .run(&corpus(&corpus_dir), full(), &NoProgress)
        .await
        .unwrap();

    let b = SqliteStore::open(&db, "b").await.unwrap();
    assert_eq!(b.count().await.unwrap(), 0);
    assert!(a.count().await.unwrap() > 0);
}
