use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::{JobStats, Worker};
use crate::routes::{api_error, ApiError};

#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    pub workers: Vec<Worker>,
    pub count: usize,
}

/// GET /api/v1/stats — broker counters.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<JobStats>, ApiError> {
    let stats = state.queue.get_stats().await.map_err(|e| {
        tracing::error!(error = %e, "failed to get stats");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STATS_ERROR",
            "Failed to retrieve statistics",
            None,
        )
    })?;

    Ok(Json(stats))
}

/// GET /api/v1/workers — workers seen within the liveness window.
pub async fn get_workers(
    State(state): State<AppState>,
) -> Result<Json<WorkersResponse>, ApiError> {
    let workers = queries::list_workers(&state.db).await.map_err(|e| {
        tracing::error!(error = %e, "failed to list workers");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "WORKERS_ERROR",
            "Failed to retrieve workers",
            None,
        )
    })?;

    let count = workers.len();
    Ok(Json(WorkersResponse { workers, count }))
}
