//! HTTP API server.
//!
//! Exposes the harvested corpus over a small JSON API so other local tools
//! can query it without linking against the crate.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Run a keyword/semantic/hybrid search |
//! | `GET`  | `/documents/{id}` | Fetch a document with its chunks |
//! | `GET`  | `/stats` | Corpus counts and embedding coverage |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embeddings_disabled` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::get;
use crate::models::SearchResult;
use crate::search::{self, SearchRequest};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    println!("HTTP server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/documents/{id}", get(handle_get_document))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps handler errors to the most appropriate status code. Validation and
/// configuration problems come back as 400, missing documents as 404,
/// everything else as 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("requires embeddings") || msg.contains("disabled") {
        let mut e = bad_request(msg);
        e.code = "embeddings_disabled".to_string();
        e
    } else if msg.contains("must not be empty") || msg.contains("Unknown search mode") {
        bad_request(msg)
    } else {
        internal_error(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

fn default_mode() -> String {
    "keyword".to_string()
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let req = SearchRequest {
        query: body.query,
        mode: body.mode.parse().map_err(classify_error)?,
        source: body.source,
        since: body.since,
        limit: body.limit,
    };

    let results = search::search_documents(&state.config, &req)
        .await
        .map_err(classify_error)?;

    Ok(Json(SearchResponse { results }))
}

// ============ GET /documents/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<get::DocumentResponse>, AppError> {
    let doc = get::get_document(&state.config, &id)
        .await
        .map_err(classify_error)?;
    Ok(Json(doc))
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    documents: i64,
    chunks: i64,
    embedded: i64,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let pool = crate::db::connect(&state.config)
        .await
        .map_err(classify_error)?;

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    pool.close().await;

    Ok(Json(StatsResponse {
        documents,
        chunks,
        embedded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    /// Boots the router against a fresh migrated database on an ephemeral
    /// port and returns the base URL.
    async fn spawn_test_server() -> String {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("harv.toml");
        let body = format!(
            "[db]\npath = \"{}\"\n\n[chunking]\ntarget_tokens = 200\n\n[retrieval]\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            dir.path().join("harv.sqlite").display()
        );
        std::fs::write(&config_path, body).unwrap();
        let config = crate::config::load_config(&config_path).unwrap();
        migrate::run_migrations(&config).await.unwrap();

        let state = AppState {
            config: Arc::new(config),
        };
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        // Keep the temp database alive for the duration of the test run.
        std::mem::forget(dir);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let base = spawn_test_server().await;
        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_document_returns_404_error_body() {
        let base = spawn_test_server().await;
        let resp = reqwest::get(format!("{}/documents/no-such-id", base))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no-such-id"));
    }

    #[tokio::test]
    async fn empty_query_returns_400_error_body() {
        let base = spawn_test_server().await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/search", base))
            .json(&serde_json::json!({ "query": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
        assert_eq!(body["error"]["message"], "query must not be empty");
    }

    #[tokio::test]
    async fn semantic_search_without_provider_is_embeddings_disabled() {
        let base = spawn_test_server().await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/search", base))
            .json(&serde_json::json!({ "query": "docs", "mode": "semantic" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "embeddings_disabled");
    }
}
