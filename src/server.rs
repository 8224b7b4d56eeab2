//! HTTP surface over the query engine.
//!
//! Four JSON routes plus an optional static directory for a browser front end.
//! Store access is synchronous, so every handler runs its query on the
//! blocking pool.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::VaultError;
use crate::model::{MessageDetail, MessageView};
use crate::query::{QueryEngine, QueryLimits};
use crate::storage::Storage;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub limits: QueryLimits,
}

impl AppState {
    pub fn new(storage: Arc<Storage>, limits: QueryLimits) -> Self {
        Self { storage, limits }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
}

/// Error payload: `{"error": "...", "kind": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// A query failure mapped to an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal_error",
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let status = match &err {
            VaultError::NotFound { .. } | VaultError::NoNeighbor { .. } => StatusCode::NOT_FOUND,
            VaultError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !err.is_recoverable() {
            error!(error = %err, "Query failed");
        }
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the application router. Unmatched paths fall through to
/// `static_dir` when one is given.
pub fn router(state: AppState, static_dir: Option<&FsPath>) -> Router {
    let api = Router::new()
        .route("/search", get(search))
        .route("/messages/{id}", get(message_detail))
        .route("/messages/{id}/before", get(messages_before))
        .route("/messages/{id}/after", get(messages_after))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(state: AppState, addr: SocketAddr, static_dir: Option<&FsPath>) -> anyhow::Result<()> {
    let app = router(state, static_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("groupvault listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Run a query on the blocking pool.
async fn run_query<T, F>(state: AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&QueryEngine<'_>) -> crate::error::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let engine = QueryEngine::with_limits(&state.storage, state.limits);
        f(&engine)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal("query task failed")
    })?
    .map_err(ApiError::from)
}

fn page_limit(params: &PageParams, limits: QueryLimits) -> usize {
    params.limit.unwrap_or(limits.max_page).min(limits.max_page)
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    run_query(state, move |engine| engine.search(&params.q))
        .await
        .map(Json)
}

async fn message_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageDetail>, ApiError> {
    run_query(state, move |engine| engine.detail(&id))
        .await
        .map(Json)
}

async fn messages_before(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let limit = page_limit(&params, state.limits);
    run_query(state, move |engine| engine.before(&id, limit))
        .await
        .map(Json)
}

async fn messages_after(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let limit = page_limit(&params, state.limits);
    run_query(state, move |engine| engine.after(&id, limit))
        .await
        .map(Json)
}
