/// Scheduled job REST API endpoints
///
/// Schedules, cancels, and reports on jobs through the shared scheduling gateway.
/// Authorization and flow validation happen in the caller before these are hit.

use crate::{
    api::AppState,
    scheduling::{JobId, JobStatus, QueueError},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for scheduling a work item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleJobRequest {
    pub work_item_id: String,
    pub tenant_id: String,
    pub target: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Response for job scheduling
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleJobResponse {
    pub job_id: JobId,
}

/// Create job routes
pub fn create_job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(schedule_job))
        .route("/api/jobs/{id}", get(get_job_status).delete(cancel_job))
}

fn status_for(error: &QueueError) -> StatusCode {
    match error {
        QueueError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Schedule a work item
///
/// POST /api/jobs
/// Body: { "workItemId": "...", "tenantId": "...", "target": "YOUTUBE", "scheduledAt": "2026-01-01T10:00:00Z" }
/// Returns: 201 { "jobId": "post-..." }
async fn schedule_job(
    State(state): State<AppState>,
    Json(payload): Json<ScheduleJobRequest>,
) -> Result<(StatusCode, Json<ScheduleJobResponse>), StatusCode> {
    if payload.work_item_id.trim().is_empty() || payload.tenant_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state
        .gateway
        .schedule(&payload.work_item_id, &payload.tenant_id, &payload.target, payload.scheduled_at)
        .await
    {
        Ok(job_id) => Ok((StatusCode::CREATED, Json(ScheduleJobResponse { job_id }))),
        Err(e) => {
            tracing::error!("Failed to schedule work item {}: {}", payload.work_item_id, e);
            Err(status_for(&e))
        }
    }
}

/// Get the status of a job
///
/// GET /api/jobs/{id}
async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, StatusCode> {
    match state.gateway.get_status(&JobId::from(id.as_str())).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to read status of job {}: {}", id, e);
            Err(status_for(&e))
        }
    }
}

/// Cancel a job
///
/// DELETE /api/jobs/{id}
/// Returns: { "cancelled": bool }
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.gateway.cancel(&JobId::from(id.as_str())).await {
        Ok(cancelled) => Ok(Json(json!({ "cancelled": cancelled }))),
        Err(e) => {
            tracing::error!("Failed to cancel job {}: {}", id, e);
            Err(status_for(&e))
        }
    }
}
