//! Job request validation and handler-error classification.

use std::str::FromStr;

use thiserror::Error;

use crate::models::job::{JobRequest, JobType};
use crate::models::payloads::{
    DataExportPayload, EmailPayload, ImageResizePayload, WebhookPayload,
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("job type is required")]
    MissingType,
    #[error("job payload is required")]
    MissingPayload,
    #[error("invalid job type: {0}")]
    UnknownType(String),
    #[error("invalid {job_type} payload: {source}")]
    MalformedPayload {
        job_type: JobType,
        source: serde_json::Error,
    },
    #[error("email 'to' field is required")]
    EmailMissingTo,
    #[error("email 'subject' field is required")]
    EmailMissingSubject,
    #[error("image_url is required")]
    ImageMissingUrl,
    #[error("at least one size is required")]
    ImageMissingSizes,
    #[error("image sizes must be positive")]
    ImageZeroSize,
    #[error("webhook URL is required")]
    WebhookMissingUrl,
    #[error("export_type is required")]
    ExportMissingType,
    #[error("query is required")]
    ExportMissingQuery,
}

/// Validate a job request: resolve the type tag and check the payload against
/// that type's schema. Returns the resolved type on success.
pub fn validate_job_request(req: &JobRequest) -> Result<JobType, ValidationError> {
    if req.job_type.is_empty() {
        return Err(ValidationError::MissingType);
    }

    if req.payload.is_null() {
        return Err(ValidationError::MissingPayload);
    }

    let job_type = JobType::from_str(&req.job_type)
        .map_err(|e| ValidationError::UnknownType(e.0))?;

    validate_payload(job_type, &req.payload)?;
    Ok(job_type)
}

fn validate_payload(
    job_type: JobType,
    payload: &serde_json::Value,
) -> Result<(), ValidationError> {
    let malformed = |source| ValidationError::MalformedPayload { job_type, source };

    match job_type {
        JobType::Email => {
            let email: EmailPayload =
                serde_json::from_value(payload.clone()).map_err(malformed)?;
            if email.to.is_empty() {
                return Err(ValidationError::EmailMissingTo);
            }
            if email.subject.is_empty() {
                return Err(ValidationError::EmailMissingSubject);
            }
        }
        JobType::ImageResize => {
            let image: ImageResizePayload =
                serde_json::from_value(payload.clone()).map_err(malformed)?;
            if image.image_url.is_empty() {
                return Err(ValidationError::ImageMissingUrl);
            }
            if image.sizes.is_empty() {
                return Err(ValidationError::ImageMissingSizes);
            }
            if image.sizes.iter().any(|&w| w == 0) {
                return Err(ValidationError::ImageZeroSize);
            }
        }
        JobType::Webhook => {
            let webhook: WebhookPayload =
                serde_json::from_value(payload.clone()).map_err(malformed)?;
            if webhook.url.is_empty() {
                return Err(ValidationError::WebhookMissingUrl);
            }
        }
        JobType::DataExport => {
            let export: DataExportPayload =
                serde_json::from_value(payload.clone()).map_err(malformed)?;
            if export.export_type.is_empty() {
                return Err(ValidationError::ExportMissingType);
            }
            if export.query.is_empty() {
                return Err(ValidationError::ExportMissingQuery);
            }
        }
    }

    Ok(())
}

/// Transient-fault vocabulary. A handler failure matching any of these is
/// treated as a network fault and retried; anything else consumes an attempt
/// as a permanent error.
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "network is unreachable",
    "no route to host",
    "connection reset",
];

/// Case-insensitive substring match of an error message against the
/// transient-fault vocabulary.
pub fn is_retryable_error(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobRequest;
    use serde_json::json;

    fn request(job_type: &str, payload: serde_json::Value) -> JobRequest {
        JobRequest {
            job_type: job_type.to_string(),
            payload,
            max_attempts: None,
            scheduled_at: None,
        }
    }

    #[test]
    fn test_missing_type_rejected() {
        let req = request("", json!({"to": "a@b"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::MissingType)
        ));
    }

    #[test]
    fn test_missing_payload_rejected() {
        let req = request("email", serde_json::Value::Null);
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::MissingPayload)
        ));

        // An empty object is present; it fails schema checks instead.
        let req = request("email", json!({}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::EmailMissingTo)
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let req = request("sms", json!({"to": "+123"}));
        let err = validate_job_request(&req).unwrap_err();
        assert!(err.to_string().contains("invalid job type: sms"));
    }

    #[test]
    fn test_email_requires_to_and_subject() {
        let req = request("email", json!({"subject": "s"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::EmailMissingTo)
        ));

        let req = request("email", json!({"to": "a@b"}));
        let err = validate_job_request(&req).unwrap_err();
        assert!(matches!(err, ValidationError::EmailMissingSubject));
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn test_email_optional_fields_accepted() {
        let req = request(
            "email",
            json!({
                "to": "a@b",
                "subject": "s",
                "body": "b",
                "cc": ["c@d"],
                "html": true,
                "headers": {"X-Test": "1"}
            }),
        );
        assert_eq!(validate_job_request(&req).unwrap(), JobType::Email);
    }

    #[test]
    fn test_image_resize_requires_url_and_sizes() {
        let req = request("image_resize", json!({"sizes": [100]}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::ImageMissingUrl)
        ));

        let req = request("image_resize", json!({"image_url": "u"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::ImageMissingSizes)
        ));

        let req = request("image_resize", json!({"image_url": "u", "sizes": [0]}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::ImageZeroSize)
        ));

        let req = request("image_resize", json!({"image_url": "u", "sizes": [100, 300]}));
        assert_eq!(validate_job_request(&req).unwrap(), JobType::ImageResize);
    }

    #[test]
    fn test_webhook_requires_url() {
        let req = request("webhook", json!({"method": "GET"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::WebhookMissingUrl)
        ));

        let req = request("webhook", json!({"url": "https://example.com/hook"}));
        assert_eq!(validate_job_request(&req).unwrap(), JobType::Webhook);
    }

    #[test]
    fn test_data_export_requires_type_and_query() {
        let req = request("data_export", json!({"query": "SELECT 1"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::ExportMissingType)
        ));

        let req = request("data_export", json!({"export_type": "csv"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::ExportMissingQuery)
        ));

        let req = request(
            "data_export",
            json!({"export_type": "csv", "query": "SELECT * FROM users"}),
        );
        assert_eq!(validate_job_request(&req).unwrap(), JobType::DataExport);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let req = request("email", json!({"to": 42, "subject": "s"}));
        assert!(matches!(
            validate_job_request(&req),
            Err(ValidationError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let req = request("email", json!({"to": "a@b", "subject": "s"}));
        let first = validate_job_request(&req).unwrap();
        let second = validate_job_request(&req).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_retryable_vocabulary() {
        assert!(is_retryable_error("connection refused"));
        assert!(is_retryable_error("dial tcp: i/o timeout"));
        assert!(is_retryable_error("temporary failure in name resolution"));
        assert!(is_retryable_error("network is unreachable"));
        assert!(is_retryable_error("no route to host"));
        assert!(is_retryable_error("connection reset by peer"));
    }

    #[test]
    fn test_retryable_match_is_case_insensitive() {
        assert!(is_retryable_error("Connection Refused (os error 111)"));
        assert!(is_retryable_error("request TIMEOUT after 30s"));
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!is_retryable_error("invalid payload"));
        assert!(!is_retryable_error("404 not found"));
        assert!(!is_retryable_error(""));
    }
}
