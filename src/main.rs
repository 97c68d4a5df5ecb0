//! # Archive Search CLI (`archive`)
//!
//! The `archive` binary indexes a corpus, answers one-shot queries, and runs
//! the two long-lived processes: the search daemon and the MCP adapter.
//!
//! ## Usage
//!
//! ```bash
//! archive --config ./config/archive.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `archive index` | Chunk, embed, and store every document in the corpus |
//! | `archive index --incremental` | Only index files not already in the store |
//! | `archive search "<query>"` | One-shot semantic search (loads the model in-process) |
//! | `archive stats` | Chunk count, distinct files, and index status |
//! | `archive serve daemon` | Start the HTTP search daemon |
//! | `archive serve mcp` | Start the MCP adapter on stdio |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `archive_search=info,tower_http=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archive_search::config::{self, Config};
use archive_search::daemon::{self, SearchResponse, StatsResponse};
use archive_search::embedding::{create_provider, EmbeddingProvider, HashProvider};
use archive_search::index::{IndexMode, IndexOptions, IndexReport, Indexer};
use archive_search::mcp;
use archive_search::progress::{format_number, ProgressMode};
use archive_search::service::QueryService;
use archive_search::store::{MetadataFilter, SqliteStore, VectorStore};

/// Archive Search: semantic search over a local archive of text documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/archive.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "archive",
    about = "Archive Search: semantic search over a local archive of text documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/archive.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the corpus into the vector store.
    ///
    /// By default every document is re-indexed and its previous entries
    /// replaced. Running it twice never duplicates entries.
    Index {
        /// Skip files whose path is already in the store. Edits to those
        /// files are not picked up.
        #[arg(long)]
        incremental: bool,

        /// Discover and chunk only; show counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search the archive without a running daemon.
    Search {
        query: String,

        /// Number of results to return.
        #[arg(short = 'n', long)]
        n_results: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Run a long-lived server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP search daemon on `[daemon].bind`.
    Daemon,
    /// MCP adapter on stdin/stdout, forwarding to `[adapter].daemon_url`.
    Mcp,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archive_search=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            incremental,
            dry_run,
            progress,
        } => {
            let mode = if incremental {
                IndexMode::Incremental
            } else {
                IndexMode::Full
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_index(&cfg, IndexOptions { mode, dry_run }, progress).await?;
        }
        Commands::Search { query, n_results } => {
            run_search(&cfg, &query, n_results).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Daemon => daemon::run_daemon(&cfg).await?,
            ServeService::Mcp => mcp::run_mcp(&cfg).await?,
        },
    }

    Ok(())
}

async fn load_provider(cfg: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = cfg.embedding.clone();
    tokio::task::spawn_blocking(move || create_provider(&embedding)).await?
}

async fn run_index(cfg: &Config, options: IndexOptions, progress: ProgressMode) -> Result<()> {
    // Nothing is embedded in a dry run, so skip loading the model.
    let provider: Arc<dyn EmbeddingProvider> = if options.dry_run {
        Arc::new(HashProvider::new(1))
    } else {
        load_provider(cfg).await?
    };
    let store = Arc::new(SqliteStore::open(&cfg.store.path, &cfg.store.collection).await?);

    let indexer = Indexer::new(store.clone(), provider, &cfg.chunking)?;
    let reporter = progress.reporter();
    let report = indexer.run(&cfg.corpus, options, reporter.as_ref()).await?;
    store.close().await;

    print_report(&report);
    Ok(())
}

fn print_report(report: &IndexReport) {
    let heading = if report.dry_run {
        "Index dry run"
    } else {
        "Index complete"
    };
    println!("{}", heading);
    println!("  discovered:       {}", format_number(report.discovered as u64));
    println!("  processed:        {}", format_number(report.processed as u64));
    println!("  skipped existing: {}", format_number(report.skipped_existing as u64));
    println!("  skipped empty:    {}", format_number(report.skipped_empty as u64));
    println!("  failed:           {}", format_number(report.failed.len() as u64));
    println!("  chunks indexed:   {}", format_number(report.chunks_indexed as u64));
    for failure in &report.failed {
        println!("  ! {}: {}", failure.source_file, failure.error);
    }
}

async fn run_search(cfg: &Config, query: &str, n_results: Option<usize>) -> Result<()> {
    let provider = load_provider(cfg).await?;
    let store = Arc::new(SqliteStore::open(&cfg.store.path, &cfg.store.collection).await?);
    let service = QueryService::new(provider, store.clone(), cfg.retrieval.normalization);

    let n = n_results.unwrap_or(cfg.retrieval.default_results);
    let results = service.search(query, n).await?;
    store.close().await;

    let response = SearchResponse {
        query: query.to_string(),
        total: results.len(),
        results,
    };
    print!("{}", mcp::render_search(query, &response));
    Ok(())
}

async fn run_stats(cfg: &Config) -> Result<()> {
    let store = SqliteStore::open(&cfg.store.path, &cfg.store.collection).await?;
    let total = store.count().await?;
    let files: HashSet<String> = store
        .enumerate(&MetadataFilter::All)
        .await?
        .into_iter()
        .map(|r| r.metadata.source_file)
        .collect();
    store.close().await;

    let stats = archive_search::models::IndexStats::from_count(total);
    print!(
        "{}",
        mcp::render_stats(&StatsResponse {
            total_chunks: stats.total_chunks,
            status: stats.status,
        })
    );
    println!("Distinct files: {}", format_number(files.len() as u64));
    println!("Collection: {}", store.collection());
    Ok(())
}
