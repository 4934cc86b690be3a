use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod stats;

/// Error envelope returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(
    status: StatusCode,
    code: &str,
    message: &str,
    details: Option<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: Some(code.to_string()),
            details,
        }),
    )
}
