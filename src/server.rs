//! JSON HTTP surface over the ingestion pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/orgs/{org}/bookmarks` | Submit one URL, returns the light-fetched bookmark |
//! | `POST` | `/orgs/{org}/bookmarks/bulk` | Submit many URLs for background ingestion |
//! | `POST` | `/orgs/{org}/bookmarks/{id}/reindex` | Re-fetch and re-render one bookmark |
//! | `DELETE` | `/orgs/{org}/bookmarks/{id}` | Remove one bookmark from the organization |
//! | `POST` | `/orgs/{org}/bookmarks/delete` | Remove many bookmarks, returns the ids removed |
//! | `GET`  | `/orgs/{org}/jobs/status` | Job queue counts per status |
//! | `GET`  | `/orgs/{org}/search?q=` | Full-text search with affinity cut-off |
//! | `POST` | `/orgs/{org}/schedules/play` | Run subscribed schedules now |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "not an absolute http(s) URL" } }
//! ```
//!
//! Internal failures are logged and answered with a generic message.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use crate::app::App;
use crate::dispatcher::BulkReceipt;
use crate::error::IngestError;
use crate::models::{OrgDiscovery, RelationView, SearchResult};
use crate::search;
use crate::stats;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

/// Log the cause and answer with a detail-free 500.
fn internal(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "something went wrong, please try again".to_string(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(format!("{err:#}"))
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Parse { message, .. } => bad_request(message),
            other => internal(other),
        }
    }
}

pub fn router(app: App) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/orgs/{org}/bookmarks", post(handle_submit))
        .route("/orgs/{org}/bookmarks/bulk", post(handle_bulk))
        .route("/orgs/{org}/bookmarks/delete", post(handle_bulk_delete))
        .route("/orgs/{org}/bookmarks/{id}", delete(handle_delete))
        .route("/orgs/{org}/bookmarks/{id}/reindex", post(handle_reindex))
        .route("/orgs/{org}/jobs/status", get(handle_status))
        .route("/orgs/{org}/search", get(handle_search))
        .route("/orgs/{org}/schedules/play", post(handle_play))
        .with_state(app)
}

/// Serve until `shutdown` becomes true.
pub async fn run_server(app: App, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "http server listening");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

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

#[derive(Deserialize)]
struct SubmitRequest {
    url: String,
}

async fn handle_submit(
    State(app): State<App>,
    Path(org): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<RelationView>, AppError> {
    Ok(Json(app.ingestor.submit_single(&req.url, &org).await?))
}

#[derive(Deserialize)]
struct BulkRequest {
    urls: Vec<String>,
    #[serde(default)]
    reverse: bool,
}

async fn handle_bulk(
    State(app): State<App>,
    Path(org): Path<String>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<BulkReceipt>, AppError> {
    if req.urls.is_empty() {
        return Err(bad_request("urls must not be empty"));
    }
    Ok(Json(
        app.dispatcher
            .submit_bulk(&req.urls, &org, req.reverse)
            .await?,
    ))
}

async fn handle_delete(
    State(app): State<App>,
    Path((org, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let deleted = app.ingestor.delete(&org, std::slice::from_ref(&id)).await?;
    if deleted.is_empty() {
        return Err(not_found(format!("no active bookmark {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct BulkDeleteRequest {
    ids: Vec<String>,
}

#[derive(Serialize)]
struct BulkDeleteResponse {
    deleted: Vec<String>,
}

async fn handle_bulk_delete(
    State(app): State<App>,
    Path(org): Path<String>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    if req.ids.is_empty() {
        return Err(bad_request("ids must not be empty"));
    }
    let deleted = app.ingestor.delete(&org, &req.ids).await?;
    Ok(Json(BulkDeleteResponse { deleted }))
}

async fn handle_reindex(
    State(app): State<App>,
    Path((org, id)): Path<(String, String)>,
) -> Result<Json<RelationView>, AppError> {
    match app.ingestor.reindex(&org, &id).await {
        Ok(view) => Ok(Json(view)),
        Err(IngestError::Parse { message, .. }) => Err(not_found(message)),
        Err(other) => Err(other.into()),
    }
}

async fn handle_status(
    State(app): State<App>,
    Path(org): Path<String>,
) -> Result<Json<BTreeMap<String, i64>>, AppError> {
    let report = stats::status_with_recovery(
        app.ingestor.job_queue(),
        &app.dispatcher,
        &org,
        app.config.queue.stale_after(),
    )
    .await?;
    Ok(Json(report.counts))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
}

async fn handle_search(
    State(app): State<App>,
    Path(org): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let results = search::search(app.store.as_ref(), &org, &params.q, &app.config.retrieval).await?;
    Ok(Json(results))
}

#[derive(Deserialize)]
struct PlayRequest {
    schedule_ids: Vec<String>,
}

async fn handle_play(
    State(app): State<App>,
    Path(org): Path<String>,
    Json(req): Json<PlayRequest>,
) -> Result<Json<Vec<OrgDiscovery>>, AppError> {
    if req.schedule_ids.is_empty() {
        return Err(bad_request("schedule_ids must not be empty"));
    }
    Ok(Json(
        app.discoverer
            .play_schedules(&org, &req.schedule_ids)
            .await?,
    ))
}
