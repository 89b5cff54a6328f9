//! HTTP trigger surface for training, status and cleanup.
//!
//! | Method   | Path                                        | Description                     |
//! |----------|---------------------------------------------|---------------------------------|
//! | `POST`   | `/api/train`                                | (Re)index files for a client    |
//! | `GET`    | `/api/clients/{client_id}/kb-status`        | Per-file training status        |
//! | `DELETE` | `/api/clients/{client_id}/kb/{file}`        | Remove a source file and rows   |
//! | `DELETE` | `/api/clients/{client_id}/kb/{file}/embeddings` | Remove a file's rows only   |
//! | `DELETE` | `/api/clients/{client_id}`                  | Purge all rows and files        |
//! | `POST`   | `/api/clients/{client_id}/reap`             | Delete orphaned rows            |
//! | `GET`    | `/health`                                   | Liveness, no auth               |
//!
//! Every `/api` route requires `Authorization: Bearer <KB_API_TOKEN>`.
//! Errors are returned as `{ "error": "..." }`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use kb_ingest_core::{
    DeletionSynchronizer, IngestError, IngestRequest, IngestionOrchestrator, IngestionReport,
    SharedEmbedder, SharedObjectStore, SharedVectorStore, StatusReconciler, StoreError,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub type Orchestrator = IngestionOrchestrator<SharedObjectStore, SharedVectorStore, SharedEmbedder>;
pub type Reconciler = StatusReconciler<SharedObjectStore, SharedVectorStore>;
pub type Deletion = DeletionSynchronizer<SharedObjectStore, SharedVectorStore>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub status: Arc<Reconciler>,
    pub deletion: Arc<Deletion>,
    pub api_token: Arc<str>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/train", post(handle_train))
        .route("/api/clients/{client_id}", delete(handle_purge))
        .route("/api/clients/{client_id}/kb-status", get(handle_status))
        .route("/api/clients/{client_id}/kb/{file_name}", delete(handle_remove_file))
        .route(
            "/api/clients/{client_id}/kb/{file_name}/embeddings",
            delete(handle_delete_embeddings),
        )
        .route("/api/clients/{client_id}/reap", post(handle_reap))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "kb-ingest listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Errors ============

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Validation(message) => Self::new(StatusCode::BAD_REQUEST, message),
            IngestError::Unauthorized => Self::new(StatusCode::UNAUTHORIZED, "Unauthorized"),
            IngestError::Configuration(reason) => {
                error!(%reason, "server configuration error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error")
            }
            IngestError::Storage(StoreError::NotFound(path)) => {
                Self::new(StatusCode::NOT_FOUND, format!("not found: {path}"))
            }
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(presented) if !token.is_empty() && presented == token => Ok(()),
        _ => {
            warn!("rejected unauthenticated request");
            Err(IngestError::Unauthorized.into())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /api/train ============

/// Maps a finished run to the response body. Only a run that wrote nothing
/// and hit at least one error is a failure.
fn train_response(report: IngestionReport) -> Response {
    if report.is_total_failure() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "Processing failed",
                "details": report.errors,
            })),
        )
            .into_response();
    }

    let mut body = json!({
        "success": true,
        "chunksProcessed": report.chunks_processed,
    });
    if !report.errors.is_empty() {
        body["errors"] = json!(report.errors);
    }
    (StatusCode::OK, Json(body)).into_response()
}

async fn handle_train(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let Json(request) = payload.map_err(|rejection| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Missing clientId or fileNames: {}", rejection.body_text()),
        )
    })?;

    let run = state.orchestrator.ingest(&request);
    match tokio::time::timeout(state.request_timeout, run).await {
        Ok(result) => Ok(train_response(result?)),
        Err(_) => {
            error!(
                client_id = %request.client_id,
                timeout_secs = state.request_timeout.as_secs(),
                "training run timed out"
            );
            Err(ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "Training timed out; re-run to resume",
            ))
        }
    }
}

// ============ Status and cleanup ============

async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let files = state.status.status(&client_id).await?;
    Ok(Json(json!({ "clientId": client_id, "files": files })).into_response())
}

async fn handle_delete_embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((client_id, file_name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let outcome = state
        .deletion
        .delete_embeddings(&client_id, &file_name)
        .await?;
    Ok(Json(json!({ "success": true, "rowsDeleted": outcome.total() })).into_response())
}

async fn handle_remove_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((client_id, file_name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let outcome = state.deletion.remove_file(&client_id, &file_name).await?;
    Ok(Json(json!({ "success": true, "rowsDeleted": outcome.total() })).into_response())
}

async fn handle_purge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let report = state.deletion.purge_client(&client_id).await?;
    Ok(cleanup_response(&report.errors, &report))
}

async fn handle_reap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state.api_token)?;
    let report = state.deletion.reap_orphans(&client_id).await?;
    Ok(cleanup_response(&report.errors, &report))
}

/// Cleanup that left anything behind is a server error; the report still
/// tells the caller what was removed.
fn cleanup_response<T: Serialize>(errors: &[String], report: &T) -> Response {
    if errors.is_empty() {
        return (StatusCode::OK, Json(json!({ "success": true, "report": report }))).into_response();
    }
    warn!(errors = errors.len(), "cleanup finished with errors");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "report": report })),
    )
        .into_response()
}
