//! HTTP face of the registry: thin handlers over [`RegistryHandle`].

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use gridpool_core::client::codes;
use gridpool_core::job::JobId;
use gridpool_core::wire::{
    ApiErrorBody, CounterSnapshot, DrainRequest, FetchResponse, FinishedRequest, FinishedResponse,
    JobView, RegisterRequest, RegisterResponse, ResultsResponse, StatusSnapshot,
    StoredCountResponse, SubmitRequest, SubmitResponse, TaskDescriptor,
};

use crate::registry::{RegistryError, RegistryHandle};

/// Longest a drain request is held open before answering 204.
const DRAIN_WAIT_CAP: Duration = Duration::from_secs(30);

/// Cadence of the stop handler's in-flight check.
const STOP_POLL: Duration = Duration::from_secs(2);

/// Build the broker router around a registry handle.
pub fn router(handle: RegistryHandle) -> Router {
    Router::new()
        .route("/api/task", get(task))
        .route("/api/jobs", post(register))
        .route("/api/jobs/:id", get(job))
        .route("/api/jobs/:id/fetch", post(fetch))
        .route("/api/jobs/:id/result", post(submit_result))
        .route("/api/results/next", post(drain_next))
        .route("/api/results", get(results))
        .route("/api/stored", get(stored))
        .route("/api/status", get(status))
        .route("/api/finished", post(finished))
        .route("/api/stop", post(stop))
        .route("/api/counter", get(counter))
        .with_state(handle)
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let (status, code) = match &err {
            RegistryError::UnknownJob(_) => (StatusCode::NOT_FOUND, codes::UNKNOWN_JOB),
            RegistryError::AlreadyFetched { .. } => (StatusCode::CONFLICT, codes::ALREADY_FETCHED),
            RegistryError::NotRunning { .. } => (StatusCode::CONFLICT, codes::NOT_RUNNING),
            RegistryError::Closed => (StatusCode::INTERNAL_SERVER_ERROR, "registry_closed"),
        };
        ApiError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn task(State(handle): State<RegistryHandle>) -> Result<Json<TaskDescriptor>, ApiError> {
    Ok(Json(handle.task().await?))
}

async fn register(
    State(handle): State<RegistryHandle>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let id = handle.register(body.args).await?;
    Ok(Json(RegisterResponse { id }))
}

async fn job(
    State(handle): State<RegistryHandle>,
    Path(id): Path<JobId>,
) -> Result<Json<JobView>, ApiError> {
    match handle.job(id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(RegistryError::UnknownJob(id).into()),
    }
}

async fn fetch(
    State(handle): State<RegistryHandle>,
    Path(id): Path<JobId>,
) -> Result<Json<FetchResponse>, ApiError> {
    match handle.fetch(id).await {
        Ok(args) => Ok(Json(FetchResponse { args })),
        Err(err) => {
            tracing::warn!(id, %err, "rejected fetch");
            Err(err.into())
        }
    }
}

async fn submit_result(
    State(handle): State<RegistryHandle>,
    Path(id): Path<JobId>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let accepted = handle.submit(id, body.outcome, body.elapsed_ms).await?;
    if !accepted {
        tracing::debug!(id, "result dropped, registry is stopping");
    }
    Ok(Json(SubmitResponse { accepted }))
}

async fn drain_next(
    State(handle): State<RegistryHandle>,
    Json(body): Json<DrainRequest>,
) -> Result<Response, ApiError> {
    let wait = Duration::from_millis(body.wait_ms).min(DRAIN_WAIT_CAP);
    match handle.drain(wait).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn results(
    State(handle): State<RegistryHandle>,
) -> Result<Json<ResultsResponse>, ApiError> {
    Ok(Json(ResultsResponse {
        results: handle.results().await?,
    }))
}

async fn stored(
    State(handle): State<RegistryHandle>,
) -> Result<Json<StoredCountResponse>, ApiError> {
    Ok(Json(StoredCountResponse {
        stored: handle.stored_count().await?,
    }))
}

async fn status(State(handle): State<RegistryHandle>) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(handle.status().await?))
}

async fn finished(
    State(handle): State<RegistryHandle>,
    Json(body): Json<FinishedRequest>,
) -> Result<Json<FinishedResponse>, ApiError> {
    Ok(Json(FinishedResponse {
        finished: handle.finished(body.mode).await?,
    }))
}

/// Sets the stopping flag, then holds the request open until no `Sending`
/// or `Storing` transition is in flight.
async fn stop(State(handle): State<RegistryHandle>) -> Result<StatusCode, ApiError> {
    handle.set_stopping().await?;
    loop {
        let snap = handle.status().await?;
        if snap.counts.in_flight() == 0 {
            break;
        }
        tracing::info!(
            sending = snap.counts.sending,
            storing = snap.counts.storing,
            "waiting for in-flight transitions before stopping"
        );
        tokio::time::sleep(STOP_POLL).await;
    }
    Ok(StatusCode::OK)
}

async fn counter(State(handle): State<RegistryHandle>) -> Result<Json<CounterSnapshot>, ApiError> {
    Ok(Json(handle.counter().await?))
}
