//! HTTP server for the search API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/search` | Hybrid search, one result per post |
//! | `POST` | `/api/embeddings` | Raw query embedding, rate limited per client IP |
//! | `GET`  | `/health` | Health check (version and index state) |
//!
//! Other methods on these paths get `405 Method Not Allowed`.
//!
//! # Error Contract
//!
//! JSON errors are a single-field object:
//!
//! ```json
//! { "error": "Empty query" }
//! ```
//!
//! The one exception is missing credentials on `/api/embeddings`, which
//! returns plain text `Missing environment`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the blog frontend can
//! call the API from a different origin during development.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{create_provider, EmbedError, Embedder};
use crate::index::IndexStore;
use crate::models::{PublicResult, QueryRejection, SearchQuery};
use crate::rate_limit::{RateLimitExceeded, RateLimiter};
use crate::search::{LinearBlend, RankingStrategy, SearchEngine, SearchParams};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
///
/// The index store and rate limiter are the only mutable shared state; both
/// live here rather than in globals so each server (and each test) owns its own.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub index: Arc<IndexStore>,
    pub embedder: Arc<dyn Embedder>,
    pub ranking: Arc<dyn RankingStrategy>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build state with an explicit embedder and index store.
    pub fn new(config: Config, index: IndexStore, embedder: Arc<dyn Embedder>) -> Self {
        let ranking: Arc<dyn RankingStrategy> = Arc::new(LinearBlend {
            alpha: config.retrieval.hybrid_alpha,
        });
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Self {
            config: Arc::new(config),
            index: Arc::new(index),
            embedder,
            ranking,
            limiter,
        }
    }

    /// Build state from configuration alone: file-backed index and the
    /// configured embedding provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding, config.index.dims)?;
        let index = IndexStore::from_config(config);
        Ok(Self::new(config.clone(), index, embedder))
    }
}

/// Build the router with all routes and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(handle_search))
        .route("/api/embeddings", post(handle_embeddings))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Bind to `[server].bind` and serve indefinitely.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        index = %config.index.path.display(),
        model = state.embedder.model_name(),
        "search server listening"
    );
    serve(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Every failure a handler can report, mapped to a status and body.
#[derive(Debug)]
pub enum ApiError {
    MissingQuery,
    EmptyQuery,
    MissingApiKey,
    MissingEnvironment,
    SearchFailed,
    EmbeddingFailed,
    RateLimited(RateLimitExceeded),
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        match rejection {
            QueryRejection::Missing => ApiError::MissingQuery,
            QueryRejection::Empty => ApiError::EmptyQuery,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let json = |status: StatusCode, error: &'static str| {
            (status, Json(ErrorBody { error })).into_response()
        };
        match self {
            ApiError::MissingQuery => json(StatusCode::BAD_REQUEST, "Missing query"),
            ApiError::EmptyQuery => json(StatusCode::BAD_REQUEST, "Empty query"),
            ApiError::MissingApiKey => json(StatusCode::INTERNAL_SERVER_ERROR, "Missing API key"),
            ApiError::SearchFailed => json(StatusCode::INTERNAL_SERVER_ERROR, "Search failed"),
            ApiError::EmbeddingFailed => {
                json(StatusCode::INTERNAL_SERVER_ERROR, "Embedding failed")
            }
            ApiError::MissingEnvironment => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Missing environment").into_response()
            }
            ApiError::RateLimited(exceeded) => {
                let mut resp = json(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
                set_rate_limit_headers(resp.headers_mut(), exceeded.limit, 0);
                resp
            }
        }
    }
}

fn set_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

// ============ POST /api/search ============

/// Handler for `POST /api/search`.
///
/// Validates the body, embeds the query, loads the index on first use, runs
/// the hybrid query and returns one result per post.
async fn handle_search(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<PublicResult>>, ApiError> {
    let query = SearchQuery::from_body(&body)?;

    if !state.embedder.is_configured() {
        return Err(ApiError::MissingApiKey);
    }

    let engine = SearchEngine {
        index: &state.index,
        embedder: state.embedder.as_ref(),
        ranking: state.ranking.as_ref(),
        params: SearchParams::from(&state.config.retrieval),
        base_url: &state.config.site.base_url,
    };

    match engine.run(&query).await {
        Ok(results) => Ok(Json(results)),
        Err(e) if matches!(e.downcast_ref::<EmbedError>(), Some(EmbedError::MissingApiKey)) => {
            Err(ApiError::MissingApiKey)
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "search failed");
            Err(ApiError::SearchFailed)
        }
    }
}

// ============ POST /api/embeddings ============

/// Handler for `POST /api/embeddings`.
///
/// Returns the raw query vector. Each client IP may call this
/// `[rate_limit].limit` times per window.
async fn handle_embeddings(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !state.embedder.is_configured() {
        return Err(ApiError::MissingEnvironment);
    }

    let key = client_key(&headers, peer);
    let status = state
        .limiter
        .check(state.config.rate_limit.limit, &key)
        .map_err(|exceeded| {
            tracing::debug!(client = %key, usage = exceeded.current_usage, "rate limited");
            ApiError::RateLimited(exceeded)
        })?;

    let query = SearchQuery::from_body(&body)?;

    let vector = state.embedder.embed(query.as_str()).await.map_err(|e| match e {
        EmbedError::MissingApiKey => ApiError::MissingEnvironment,
        other => {
            tracing::error!(error = %other, "embedding failed");
            ApiError::EmbeddingFailed
        }
    })?;

    let mut resp = Json(vector).into_response();
    set_rate_limit_headers(resp.headers_mut(), status.limit, status.remaining);
    Ok(resp)
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the TCP peer address.
pub fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.ip().to_string()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: IndexHealth,
}

#[derive(Serialize)]
struct IndexHealth {
    loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    documents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loaded_at: Option<String>,
}

/// Handler for `GET /health`. Reports index state without loading it.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = match state.index.loaded() {
        Some(handle) => IndexHealth {
            loaded: true,
            documents: Some(handle.len()),
            fingerprint: Some(handle.fingerprint().to_string()),
            loaded_at: Some(handle.loaded_at().to_rfc3339()),
        },
        None => IndexHealth {
            loaded: false,
            documents: None,
            fingerprint: None,
            loaded_at: None,
        },
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index,
    })
}
