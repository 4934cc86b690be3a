use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::db;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
}

/// GET /api/v1/health — both downstreams must answer for "healthy".
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut response = HealthResponse {
        status: "healthy".to_string(),
        service: "taskflow-api".to_string(),
        redis: None,
        redis_error: None,
        database: None,
        database_error: None,
    };

    match state.queue.ping().await {
        Ok(()) => response.redis = Some("connected".to_string()),
        Err(e) => {
            response.status = "unhealthy".to_string();
            response.redis_error = Some(e.to_string());
        }
    }

    match db::ping(&state.db).await {
        Ok(()) => response.database = Some("connected".to_string()),
        Err(e) => {
            response.status = "unhealthy".to_string();
            response.database_error = Some(e.to_string());
        }
    }

    let status_code = if response.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
