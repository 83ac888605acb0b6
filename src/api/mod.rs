//! HTTP surface of a fleet host.
//!
//! `/internal/*` routes are the transport endpoints peers call while pushing
//! jobs; `/api/*` routes answer read-only admin queries and trigger fleet
//! operations.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::chain::JobLauncher;
use crate::error::FleetError;
use crate::host::{Host, HostDirectory};
use crate::jobstore::JobConfigStore;
use crate::loader::JobLoader;
use crate::placement::JobPlacementRegistry;
use crate::sync::{JobSyncService, SyncReport};
use crate::trigger::TriggerRegistry;

/// Dependencies such as libraries can be large.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub directory: Arc<HostDirectory>,
    pub registry: Arc<JobPlacementRegistry>,
    pub store: Arc<JobConfigStore>,
    pub triggers: Arc<TriggerRegistry>,
    pub sync: Arc<JobSyncService>,
    pub loader: Arc<JobLoader>,
    pub launcher: Arc<dyn JobLauncher>,
}

#[derive(Debug, Serialize)]
pub struct JobDetails {
    pub name: String,
    pub directory: String,
    pub dependencies: Vec<String>,
    pub cron_expression: Option<String>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub hosts: BTreeSet<Host>,
}

/// [`FleetError`] rendered as an HTTP response.
pub struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FleetError::Configuration(_) => StatusCode::BAD_REQUEST,
            FleetError::JobNotFound(_) => StatusCode::NOT_FOUND,
            FleetError::LoadRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FleetError::CoordinationService(_) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::Transport(_) => StatusCode::BAD_GATEWAY,
            FleetError::Io(_) | FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let internal = Router::new()
        .route("/internal/jobs/:job/definition", put(put_definition_handler))
        .route(
            "/internal/jobs/:job/dependencies/:file",
            put(put_dependency_handler),
        )
        .route("/internal/jobs/:job/load", post(load_job_handler))
        .route("/internal/jobs/:job/push", post(push_job_handler))
        .route("/internal/pull", post(pull_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    let admin = Router::new()
        .route("/api/host", get(current_host_handler))
        .route("/api/hosts", get(all_hosts_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:job", get(job_details_handler))
        .route("/api/jobs/:job/deploy", post(deploy_job_handler))
        .route("/api/jobs/:job/run", post(run_job_handler))
        .route("/api/sync", post(sync_handler))
        .route("/api/pull", post(request_pull_handler))
        .layer(cors);

    internal.merge(admin).with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// =============================================================================
// Transport endpoints
// =============================================================================

async fn put_definition_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    state.store.write_definition(&job, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_dependency_handler(
    State(state): State<ApiState>,
    Path((job, file)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    state.store.add_dependency(&job, &file, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_job_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
) -> ApiResult<Response> {
    match state.loader.load_job(&job).await {
        Ok(declaration) => Ok(Json(declaration).into_response()),
        // Bad input from the pushing host: reject the job, not the request
        Err(e @ (FleetError::Configuration(_) | FleetError::JobNotFound(_))) => {
            tracing::warn!(job = %job, error = %e, "Rejecting job load");
            Ok((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn push_job_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
    Json(target): Json<Host>,
) -> ApiResult<StatusCode> {
    state.sync.try_push_with_retry(&job, &target, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pull_handler(
    State(state): State<ApiState>,
    Json(requester): Json<Host>,
) -> ApiResult<Json<SyncReport>> {
    tracing::info!(requester = %requester, "Pull requested");
    Ok(Json(state.sync.deploy_all_jobs_to_host(&requester).await?))
}

// =============================================================================
// Admin endpoints
// =============================================================================

async fn current_host_handler(State(state): State<ApiState>) -> ApiResult<Json<Host>> {
    Ok(Json(state.directory.current_host()?))
}

async fn all_hosts_handler(State(state): State<ApiState>) -> ApiResult<Json<BTreeSet<Host>>> {
    Ok(Json(state.directory.all_hosts().await?))
}

async fn list_jobs_handler(State(state): State<ApiState>) -> ApiResult<Json<BTreeSet<String>>> {
    let current = state.directory.current_host()?;
    Ok(Json(state.registry.jobs_on_host(&current).await?))
}

async fn job_details_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
) -> ApiResult<Json<JobDetails>> {
    let definition = state
        .store
        .definition_path(&job)
        .await?
        .ok_or_else(|| FleetError::JobNotFound(job.clone()))?;
    let directory = definition
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    Ok(Json(JobDetails {
        dependencies: state.store.list_dependencies(&job).await?,
        cron_expression: state.triggers.cron_expression(&job).await,
        next_fire_time: state.triggers.next_fire_time(&job).await,
        hosts: state.registry.hosts_for_job(&job).await?,
        directory,
        name: job,
    }))
}

async fn deploy_job_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.sync.deploy_job_to_all_hosts(&job).await?))
}

async fn run_job_handler(
    State(state): State<ApiState>,
    Path(job): Path<String>,
) -> ApiResult<StatusCode> {
    state.launcher.run_job(&job).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn sync_handler(State(state): State<ApiState>) -> ApiResult<Json<SyncReport>> {
    Ok(Json(state.sync.sync_all_hosts().await?))
}

async fn request_pull_handler(
    State(state): State<ApiState>,
    Json(source): Json<Host>,
) -> ApiResult<StatusCode> {
    state.sync.pull_request(&source).await?;
    Ok(StatusCode::NO_CONTENT)
}
