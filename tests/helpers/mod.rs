//! Test helper utilities for end-to-end testing against a running stack.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

/// Base URL from env or default to localhost.
pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Debug, Deserialize)]
pub struct JobEnvelope {
    pub job: JobBody,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobBody {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Submit a job and return the created envelope.
pub async fn submit_job(
    client: &reqwest::Client,
    base: &str,
    job_type: &str,
    payload: serde_json::Value,
    max_attempts: Option<i32>,
) -> Result<JobEnvelope, Box<dyn std::error::Error>> {
    let mut body = json!({"type": job_type, "payload": payload});
    if let Some(max) = max_attempts {
        body["max_attempts"] = json!(max);
    }

    let response = client
        .post(format!("{base}/api/v1/jobs"))
        .json(&body)
        .send()
        .await?;

    assert_eq!(response.status(), 201, "unexpected create status");
    Ok(response.json().await?)
}

/// Poll a job until it reaches a terminal status or the deadline passes.
pub async fn wait_for_terminal(
    client: &reqwest::Client,
    base: &str,
    job_id: &str,
    deadline: Duration,
) -> Result<JobBody, Box<dyn std::error::Error>> {
    let started = std::time::Instant::now();

    loop {
        let envelope: JobEnvelope = client
            .get(format!("{base}/api/v1/jobs/{job_id}"))
            .send()
            .await?
            .json()
            .await?;

        if envelope.job.status == "completed" || envelope.job.status == "failed" {
            return Ok(envelope.job);
        }

        if started.elapsed() > deadline {
            return Err(format!(
                "job {job_id} still {} after {:?}",
                envelope.job.status, deadline
            )
            .into());
        }

        sleep(Duration::from_millis(500)).await;
    }
}
