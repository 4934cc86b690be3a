use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobType};
use crate::models::payloads::{EmailPayload, EmailResult};
use crate::worker::registry::{HandlerError, JobHandler};

/// Simulated email delivery. Send time scales with body length the way a
/// real SMTP round-trip would.
pub struct EmailHandler;

#[async_trait]
impl JobHandler for EmailHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::Email]
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: EmailPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(JobType::Email, e))?;

        tracing::info!(
            job_id = %job.id,
            to = %payload.to,
            subject = %payload.subject,
            "sending email"
        );

        let send_time = Duration::from_secs(1 + (payload.body.len() / 100) as u64);
        tokio::select! {
            _ = tokio::time::sleep(send_time) => {}
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        }

        tracing::info!(job_id = %job.id, to = %payload.to, "email sent");

        let result = EmailResult {
            message_id: format!("msg_{}", Utc::now().timestamp()),
            sent_at: Utc::now().to_rfc3339(),
        };

        Ok(serde_json::to_value(result)?)
    }
}
