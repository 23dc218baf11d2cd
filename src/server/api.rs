use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::dispatch::ReentryRequest;
use crate::errors::OrchestratorError;
use crate::store::{FrontierCounts, JobRecord};
use crate::tick::TickController;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub controller: Arc<TickController>,
}

pub type SharedState = Arc<AppState>;

#[derive(Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobRecord,
    pub frontier: FrontierCounts,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Unauthorized,
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid bearer token".to_string()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::JobNotFound { id } => ApiError::NotFound(format!("job {} not found", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/internal/tick", post(reenter))
        .route("/jobs/{id}", get(get_job))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Err(ApiError::Unavailable(
            "re-entry token not configured".to_string(),
        ));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Accept a continuation and run the tick in the background, so the caller
/// gets its 2xx without waiting on the handler.
async fn reenter(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ReentryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caps = state.controller.capabilities();
    check_bearer(&headers, caps.credentials.reentry_token.as_deref())?;

    if caps.jobs().find(&req.job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("job {} not found", req.job_id)));
    }

    let controller = state.controller.clone();
    let job_id = req.job_id.clone();
    tokio::spawn(async move {
        // tick() logs its own outcome and failures.
        let _ = controller.tick(&job_id).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"job_id": req.job_id, "accepted": true})),
    ))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caps = state.controller.capabilities();
    let job = caps.jobs().get(&id).await?;
    let frontier = caps.frontier().counts(&id).await?;
    Ok(Json(JobView { job, frontier }))
}
