//! Dispatch from job type to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobType};
use crate::worker::handlers::{
    data_export::DataExportHandler, email::EmailHandler, image_resize::ImageResizeHandler,
    webhook::WebhookHandler,
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid {0} payload: {1}")]
    InvalidPayload(JobType, #[source] serde_json::Error),

    #[error("no handler registered for job type: {0}")]
    NoHandler(JobType),

    #[error("job cancelled")]
    Cancelled,

    #[error("failed to serialize result: {0}")]
    SerializeResult(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// A handler processes jobs of the types it declares. The cancellation token
/// is derived from the owning worker; handlers are expected to honour it
/// promptly.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_types(&self) -> &[JobType];

    async fn process(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Read-only registry mapping each job type to its handler. Built once at
/// startup.
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the four built-in handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailHandler));
        registry.register(Arc::new(ImageResizeHandler));
        registry.register(Arc::new(WebhookHandler::new()));
        registry.register(Arc::new(DataExportHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        for &job_type in handler.job_types() {
            tracing::debug!(job_type = %job_type, "registered handler");
            self.handlers.insert(job_type, handler.clone());
        }
    }

    pub fn get(&self, job_type: JobType) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&job_type)
    }

    pub fn supported_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }

    /// Run the job through the handler registered for its type.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError> {
        let handler = self
            .get(job.job_type)
            .ok_or(HandlerError::NoHandler(job.job_type))?;

        handler.process(cancel, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobRequest, JobType};
    use serde_json::json;

    #[test]
    fn test_default_registry_covers_all_types() {
        let registry = HandlerRegistry::with_default_handlers();
        let mut types = registry.supported_types();
        types.sort_by_key(|t| t.as_str());

        assert_eq!(
            types,
            vec![
                JobType::DataExport,
                JobType::Email,
                JobType::ImageResize,
                JobType::Webhook,
            ]
        );

        for job_type in types {
            assert!(registry.get(job_type).is_some());
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_fails() {
        let registry = HandlerRegistry::new();
        let req = JobRequest {
            job_type: "email".to_string(),
            payload: json!({"to": "a@b", "subject": "s"}),
            max_attempts: None,
            scheduled_at: None,
        };
        let job = Job::from_request(&req, JobType::Email);

        let cancel = CancellationToken::new();
        let err = registry.dispatch(&cancel, &job).await.unwrap_err();
        assert!(matches!(err, HandlerError::NoHandler(JobType::Email)));
    }
}
