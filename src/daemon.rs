//! Search daemon HTTP server.
//!
//! Keeps the embedding model and the vector store loaded in one long-lived
//! process so each query pays only for one embedding and one store lookup.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness plus readiness flags. Always 200. |
//! | `GET`  | `/stats` | Total chunks and index status. |
//! | `POST` | `/search` | `{ "query": "...", "n_results": 5 }` → ranked chunks. |
//!
//! # Readiness
//!
//! The listener is bound before the model is loaded, so `/health` answers
//! while the daemon is still initializing. Until [`Readiness`] reaches
//! [`Phase::Ready`], `/search` and `/stats` answer `503`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "service_unavailable", "message": "search service not initialized" } }
//! ```
//!
//! Error codes: `bad_request` (400), `service_unavailable` (503), `internal` (500).

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::models::{IndexStatus, SearchResult};
use crate::service::{QueryService, ServiceError};
use crate::store::{SqliteStore, VectorStore};

// ============ Readiness ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Daemon lifecycle state, shared between the init task and the handlers.
///
/// `Ready` is terminal: the [`QueryService`] is published exactly once.
pub struct Readiness {
    phase: AtomicU8,
    service: OnceLock<Arc<QueryService>>,
    model_loaded: AtomicBool,
    collection_connected: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(UNINITIALIZED),
            service: OnceLock::new(),
            model_loaded: AtomicBool::new(false),
            collection_connected: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            UNINITIALIZED => Phase::Uninitialized,
            INITIALIZING => Phase::Initializing,
            _ => Phase::Ready,
        }
    }

    /// Move `Uninitialized → Initializing`. Returns false from any other phase.
    pub fn mark_initializing(&self) -> bool {
        self.phase
            .compare_exchange(
                UNINITIALIZED,
                INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_model_loaded(&self) {
        self.model_loaded.store(true, Ordering::Release);
    }

    pub fn mark_collection_connected(&self) {
        self.collection_connected.store(true, Ordering::Release);
    }

    /// Publish the service and move to `Ready`.
    pub fn mark_ready(&self, service: Arc<QueryService>) -> Result<()> {
        self.service
            .set(service)
            .map_err(|_| anyhow!("search service already initialized"))?;
        self.model_loaded.store(true, Ordering::Release);
        self.collection_connected.store(true, Ordering::Release);
        self.phase.store(READY, Ordering::Release);
        Ok(())
    }

    /// The query service, once `Ready`.
    pub fn service(&self) -> Option<Arc<QueryService>> {
        self.service.get().cloned()
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded.load(Ordering::Acquire)
    }

    pub fn collection_connected(&self) -> bool {
        self.collection_connected.load(Ordering::Acquire)
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Wire types ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"healthy"` whenever the process is answering.
    pub status: String,
    pub phase: Phase,
    pub model_loaded: bool,
    pub collection_connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_chunks: u64,
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Falls back to `[retrieval].default_results` when absent.
    #[serde(default)]
    pub n_results: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_ready() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "service_unavailable",
        message: ServiceError::NotReady.to_string(),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotReady => not_ready(),
            ServiceError::InvalidRequest(msg) => bad_request(msg),
            ServiceError::Internal(e) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message,
                }
            }
        }
    }
}

// ============ Router ============

#[derive(Clone)]
struct AppState {
    readiness: Arc<Readiness>,
    default_results: usize,
}

/// Build the daemon's router. Exposed so tests and embedders can serve it
/// on their own listener.
pub fn router(readiness: Arc<Readiness>, default_results: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/search", post(handle_search))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState {
            readiness,
            default_results,
        })
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let r = &state.readiness;
    Json(HealthResponse {
        status: "healthy".to_string(),
        phase: r.phase(),
        model_loaded: r.model_loaded(),
        collection_connected: r.collection_connected(),
    })
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let service = state.readiness.service().ok_or_else(not_ready)?;
    let stats = service.stats().await?;
    Ok(Json(StatsResponse {
        total_chunks: stats.total_chunks,
        status: stats.status,
    }))
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;

    let n_results = req.n_results.unwrap_or(state.default_results as i64);
    if n_results < 1 {
        return Err(bad_request("n_results must be at least 1"));
    }

    let service = state.readiness.service().ok_or_else(not_ready)?;
    let results = service.search(&req.query, n_results as usize).await?;

    Ok(Json(SearchResponse {
        query: req.query,
        total: results.len(),
        results,
    }))
}

// ============ Lifecycle ============

/// Run the daemon until Ctrl-C.
///
/// Serves `/health` immediately, loads the model and opens the store in
/// the background, then flips to ready. A failed initialization is fatal:
/// the server is torn down and the error returned.
pub async fn run_daemon(config: &Config) -> Result<()> {
    let readiness = Arc::new(Readiness::new());
    let app = router(readiness.clone(), config.retrieval.default_results);

    let listener = tokio::net::TcpListener::bind(&config.daemon.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.daemon.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "search daemon listening");

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    tokio::select! {
        result = &mut server => {
            // Shut down before initialization finished.
            result??;
            return Ok(());
        }
        init = initialize(config, &readiness) => {
            if let Err(e) = init {
                tracing::error!(error = %format!("{:#}", e), "daemon initialization failed");
                server.abort();
                return Err(e.context("daemon initialization failed"));
            }
        }
    }

    server.await??;
    tracing::info!("search daemon stopped");
    Ok(())
}

async fn initialize(config: &Config, readiness: &Readiness) -> Result<()> {
    readiness.mark_initializing();

    let embedding = config.embedding.clone();
    let provider = tokio::task::spawn_blocking(move || create_provider(&embedding))
        .await
        .context("model loading task failed")??;
    readiness.mark_model_loaded();
    tracing::info!(model = provider.model_name(), dims = provider.dims(), "embedding model loaded");

    let store = SqliteStore::open(&config.store.path, &config.store.collection).await?;
    let total = store.count().await?;
    readiness.mark_collection_connected();
    tracing::info!(collection = store.collection(), total_chunks = total, "collection connected");

    let service = QueryService::new(provider, Arc::new(store), config.retrieval.normalization);
    readiness.mark_ready(Arc::new(service))?;
    tracing::info!("search daemon ready");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}
