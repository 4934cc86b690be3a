use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobType};
use crate::models::payloads::{WebhookPayload, WebhookResult};
use crate::worker::registry::{HandlerError, JobHandler};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers webhook jobs over HTTP. The only handler doing real network I/O;
/// connection failures surface with messages the retryability classifier
/// recognises.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten an error and its source chain into one message, so connect
/// failures keep their "connection refused" detail for the retryability
/// classifier.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::Webhook]
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: WebhookPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(JobType::Webhook, e))?;

        let method = reqwest::Method::from_bytes(payload.method.to_uppercase().as_bytes())
            .map_err(|_| HandlerError::Failed(format!("invalid HTTP method: {}", payload.method)))?;

        tracing::info!(job_id = %job.id, url = %payload.url, method = %method, "making webhook call");

        let mut request = self.client.request(method, &payload.url);
        if let Some(data) = &payload.data {
            request = request.json(data);
        }
        for (name, value) in &payload.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = payload.timeout {
            request = request.timeout(Duration::from_secs(timeout));
        }

        let started = Instant::now();
        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| HandlerError::Failed(format!("webhook call failed: {}", error_chain(&e))))?,
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        };
        let duration = started.elapsed();

        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let response_body = response
            .text()
            .await
            .map_err(|e| HandlerError::Failed(format!("failed to read response body: {e}")))?;

        tracing::info!(
            job_id = %job.id,
            url = %payload.url,
            status_code,
            duration_ms = duration.as_millis() as i64,
            "webhook call completed"
        );

        let result = WebhookResult {
            status_code,
            response_body,
            headers,
            duration_ms: duration.as_millis() as i64,
        };

        Ok(serde_json::to_value(result)?)
    }
}
