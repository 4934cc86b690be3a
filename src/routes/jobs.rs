use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::{Job, JobRequest, JobResponse, JobStatus};
use crate::routes::{api_error, ApiError};
use crate::services::queue::QueueError;
use crate::services::validation::validate_job_request;

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

/// POST /api/v1/jobs — validate, persist, enqueue.
pub async fn create_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let req: JobRequest = serde_json::from_slice(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_JSON",
            "Invalid JSON payload",
            Some(e.to_string()),
        )
    })?;

    let job_type = validate_job_request(&req).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "Invalid job request",
            Some(e.to_string()),
        )
    })?;

    let job = Job::from_request(&req, job_type);

    if let Err(e) = queries::create_job(&state.db, &job).await {
        tracing::error!(job_id = %job.id, error = %e, "failed to store job");
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE_ERROR",
            "Failed to create job",
            None,
        ));
    }

    if let Err(e) = state.queue.enqueue_job(&job).await {
        tracing::error!(job_id = %job.id, error = %e, "failed to enqueue job");
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "QUEUE_ERROR",
            "Failed to enqueue job",
            None,
        ));
    }

    tracing::info!(job_id = %job.id, job_type = %job.job_type, "job created and queued");
    metrics::counter!("taskflow_jobs_submitted_total", "type" => job.job_type.as_str())
        .increment(1);

    Ok((
        StatusCode::CREATED,
        Json(JobResponse {
            job,
            message: Some("Job created successfully".to_string()),
        }),
    ))
}

/// GET /api/v1/jobs — durable history with pagination and filters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let page = queries::normalize_page(params.page.unwrap_or(1));
    let page_size = queries::normalize_page_size(params.page_size.unwrap_or(20));

    let (jobs, total) = queries::list_jobs(
        &state.db,
        page,
        page_size,
        params.status.as_deref(),
        params.job_type.as_deref(),
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "failed to list jobs");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE_ERROR",
            "Failed to retrieve jobs",
            None,
        )
    })?;

    let total_pages = (total + page_size - 1) / page_size;

    Ok(Json(ListJobsResponse {
        jobs,
        total,
        page,
        page_size,
        total_pages,
    }))
}

/// Look a job up in the broker first (live state), then the store (history).
async fn load_job(state: &AppState, id: &str) -> Result<Job, ApiError> {
    match state.queue.get_job(id).await {
        Ok(job) => Ok(job),
        Err(e) => {
            if !matches!(e, QueueError::JobNotFound(_)) {
                tracing::warn!(job_id = %id, error = %e, "broker lookup failed, falling back to store");
            }
            match queries::get_job(&state.db, id).await {
                Ok(Some(job)) => Ok(job),
                Ok(None) => Err(api_error(
                    StatusCode::NOT_FOUND,
                    "JOB_NOT_FOUND",
                    "Job not found",
                    None,
                )),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "failed to load job from store");
                    Err(api_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "STORAGE_ERROR",
                        "Failed to retrieve job",
                        None,
                    ))
                }
            }
        }
    }
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = load_job(&state, &id).await?;
    Ok(Json(JobResponse { job, message: None }))
}

/// POST /api/v1/jobs/:id/cancel
///
/// Cancellation routes through the broker's fail path, so it is accounted as
/// a failed attempt; a job with remaining retry budget will be retried.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = load_job(&state, &id).await?;

    if job.status.is_terminal() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "CANNOT_CANCEL",
            "Job cannot be cancelled",
            Some(format!("Job is already {}", job.status)),
        ));
    }

    let cancelled = match state.queue.fail_job(&id, "Job cancelled by user").await {
        Ok(cancelled) => cancelled,
        Err(QueueError::JobNotFound(_)) => {
            // Broker record expired; the job only exists in the store. There
            // is no queue entry to transition, so fail it terminally there.
            let mut cancelled = job;
            let now = Utc::now();
            cancelled.status = JobStatus::Failed;
            cancelled.error = Some("Job cancelled by user".to_string());
            cancelled.completed_at = Some(now);
            cancelled.updated_at = now;
            cancelled
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "failed to cancel job");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CANCEL_ERROR",
                "Failed to cancel job",
                None,
            ));
        }
    };

    if let Err(e) = queries::update_job(&state.db, &cancelled).await {
        tracing::error!(job_id = %id, error = %e, "failed to mirror cancellation into store");
    }

    tracing::info!(job_id = %id, status = %cancelled.status, "job cancelled");

    Ok(Json(JobResponse {
        job: cancelled,
        message: Some("Job cancelled successfully".to_string()),
    }))
}
