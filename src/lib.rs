//! # Archive Search
//!
//! Semantic search over a local archive of text documents.
//!
//! Documents are split into overlapping chunks, embedded, and stored with
//! their vectors in a SQLite-backed vector store. A long-lived daemon keeps
//! the model and the store loaded and answers queries over HTTP; a thin MCP
//! adapter exposes the daemon to agent hosts as two tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Corpus    │──▶│  Indexer    │──▶│  SQLite  │
//! │  (*.md)     │   │ Chunk+Embed │   │  vectors │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                                          ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   MCP    │──────▶│  Daemon  │
//!                 │ (stdio)  │ HTTP  │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! archive index                     # build the index
//! archive serve daemon              # keep the model loaded
//! archive serve mcp                 # expose tools to an agent host
//! archive search "what did we decide about the move"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction and backends |
//! | [`index`] | Corpus discovery and indexing |
//! | [`progress`] | Indexing progress reporting |
//! | [`service`] | Query service and relevance normalization |
//! | [`daemon`] | HTTP search daemon |
//! | [`client`] | HTTP client for the daemon |
//! | [`mcp`] | MCP tool adapter |

pub mod chunk;
pub mod client;
pub mod config;
pub mod daemon;
pub mod embedding;
pub mod index;
pub mod mcp;
pub mod models;
pub mod progress;
pub mod service;
pub mod store;
