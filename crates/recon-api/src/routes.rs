//! HTTP routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

use recon_core::{DeviceRegistration, JobKind, JobRecord, QueueId, WorkSpec};
use recon_engine::{ImportCandidate, ImportOptions, ImportRequest, SearchRequest, ValidateRequest};
use recon_jobs::RunOutcome;

use crate::capabilities::Caps;
use crate::error::ApiError;
use crate::jobs::ImportJob;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/search", post(search))
        .route("/api/v1/validate", post(validate))
        .route("/api/v1/import", post(import))
        .route("/api/v1/import/single", post(import_single))
        .route("/api/v1/jobs/:queue_id/status", get(job_status))
        .route("/api/v1/jobs/:queue_id/cancel", post(cancel_job))
        .route("/api/v1/job-records/:job_id/sync", post(sync_job_record))
        .route("/api/v1/servers", get(list_servers))
        .route("/api/v1/servers/:key/test", get(test_server))
        .route("/api/v1/servers/:key/devices", post(register_device))
        .route("/api/v1/cache/reference", delete(invalidate_reference))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// HEALTH
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// SEARCH / VALIDATE / IMPORT
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(flatten)]
    request: SearchRequest,
    #[serde(default, rename = "async")]
    run_async: bool,
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    #[serde(flatten)]
    request: ImportRequest,
    #[serde(default, rename = "async")]
    run_async: bool,
}

/// One record, imported inline.
#[derive(Debug, Deserialize)]
struct SingleImportBody {
    #[serde(default)]
    server: Option<String>,
    #[serde(flatten)]
    candidate: ImportCandidate,
    #[serde(flatten)]
    options: ImportOptions,
    #[serde(default)]
    session: Option<String>,
}

/// Returned instead of a result when work went to the queue.
#[derive(Debug, Serialize)]
struct QueuedJob {
    queue_id: QueueId,
    job_id: Uuid,
    poll_url: String,
    estimated_count: Option<i64>,
}

impl QueuedJob {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            queue_id: record.queue_id,
            job_id: record.id,
            poll_url: format!("/api/v1/jobs/{}/status", record.queue_id),
            estimated_count: record.estimated_count,
        }
    }
}

fn run_response(outcome: RunOutcome) -> Response {
    match outcome {
        RunOutcome::Inline(value) => (StatusCode::OK, Json(value)).into_response(),
        RunOutcome::Queued(record) => {
            (StatusCode::ACCEPTED, Json(QueuedJob::from_record(&record))).into_response()
        }
    }
}

#[instrument(skip(state, body), fields(subsystem = "api", op = "search"))]
async fn search(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Json(body): Json<SearchBody>,
) -> Result<Response, ApiError> {
    // Cached result size, when known, tells the caller what to expect.
    let estimated_count = if body.run_async {
        state
            .search
            .cached_count(&body.request)
            .await
            .map(|n| n as i64)
    } else {
        None
    };
    let spec = WorkSpec {
        kind: JobKind::Search,
        payload: serde_json::to_value(&body.request).map_err(recon_core::Error::from)?,
        estimated_count,
        prefer_async: body.run_async,
    };
    let outcome = state.jobs.run(&spec, caps).await?;
    Ok(run_response(outcome))
}

#[instrument(skip(state, request), fields(subsystem = "api", op = "validate", device_id = request.device_id))]
async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.search.validate(&request).await?;
    Ok(Json(result))
}

#[instrument(skip(state, body), fields(subsystem = "api", op = "import", result_count = body.request.candidates.len()))]
async fn import(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Json(body): Json<ImportBody>,
) -> Result<Response, ApiError> {
    // Checked here as well so a queued job cannot be refused later.
    if !caps.may_write {
        return Err(ApiError::Forbidden("import requires write access".into()));
    }
    let estimated_count = Some(body.request.candidates.len() as i64);
    let job = ImportJob {
        request: body.request,
        capabilities: caps,
    };
    let spec = WorkSpec {
        kind: JobKind::Import,
        payload: serde_json::to_value(&job).map_err(recon_core::Error::from)?,
        estimated_count,
        prefer_async: body.run_async,
    };
    let outcome = state.jobs.run(&spec, caps).await?;
    Ok(run_response(outcome))
}

#[instrument(skip(state, body), fields(subsystem = "api", op = "import_single", device_id = body.candidate.device_id))]
async fn import_single(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Json(body): Json<SingleImportBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .importer
        .import_one(
            body.server.as_deref(),
            &body.candidate,
            body.options,
            body.session.as_deref(),
            caps,
        )
        .await?;
    Ok(Json(outcome))
}

// =============================================================================
// JOBS
// =============================================================================

fn require_queue_access(caps: recon_core::Capabilities) -> Result<(), ApiError> {
    if caps.may_view_queue {
        Ok(())
    } else {
        Err(ApiError::Forbidden("queue access requires elevated capability".into()))
    }
}

async fn job_status(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Path(queue_id): Path<QueueId>,
) -> Result<impl IntoResponse, ApiError> {
    require_queue_access(caps)?;
    let view = state.jobs.poll(queue_id).await?;
    Ok(Json(view))
}

async fn cancel_job(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Path(queue_id): Path<QueueId>,
) -> Result<impl IntoResponse, ApiError> {
    require_queue_access(caps)?;
    let cancel = state.jobs.cancel(queue_id).await?;
    let mut body = json!({
        "status": "ok",
        "outcome": cancel.outcome,
    });
    if let Some(status) = cancel.persisted_status {
        body["persisted_status"] = json!(status);
    }
    Ok(Json(body))
}

async fn sync_job_record(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_queue_access(caps)?;
    let record = state.jobs.reconcile(job_id).await?;
    Ok(Json(json!({
        "job_id": record.id,
        "status": record.status,
    })))
}

// =============================================================================
// SERVERS / CACHE
// =============================================================================

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    let profiles = state.search.profiles();
    let servers: Vec<_> = profiles.iter().collect();
    Json(json!({
        "active": profiles.active().key,
        "servers": servers,
    }))
}

async fn test_server(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.search.profile(Some(&key))?;
    let status = state.search.source().test_connection(&profile).await;
    Ok(Json(status))
}

#[instrument(skip(state, registration), fields(subsystem = "api", op = "register_device", profile = %key))]
async fn register_device(
    State(state): State<AppState>,
    Caps(caps): Caps,
    Path(key): Path<String>,
    Json(registration): Json<DeviceRegistration>,
) -> Result<impl IntoResponse, ApiError> {
    if !caps.may_write {
        return Err(ApiError::Forbidden("registering devices requires write access".into()));
    }
    let profile = state.search.profile(Some(&key))?;
    let response = state
        .search
        .source()
        .register_device(&profile, &registration)
        .await?;
    info!(hostname = %registration.hostname, "Device registered with monitoring source");
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct CacheQuery {
    #[serde(default)]
    server: Option<String>,
}

async fn invalidate_reference(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let fingerprint = state
        .search
        .invalidate_reference(query.server.as_deref())
        .await?;
    Ok(Json(json!({
        "status": "ok",
        "fingerprint": fingerprint,
    })))
}
