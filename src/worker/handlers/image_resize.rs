use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobType};
use crate::models::payloads::{
    ImageMetadata, ImageResizePayload, ImageResizeResult, ResizedImage,
};
use crate::worker::registry::{HandlerError, JobHandler};

// Simulated source image dimensions.
const ORIGINAL_WIDTH: u32 = 1920;
const ORIGINAL_HEIGHT: u32 = 1080;
const ORIGINAL_SIZE: i64 = 2_500_000;

/// Simulated image resizing: a fixed download cost, then per-size work
/// proportional to the target width.
pub struct ImageResizeHandler;

#[async_trait]
impl JobHandler for ImageResizeHandler {
    fn job_types(&self) -> &[JobType] {
        &[JobType::ImageResize]
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        job: &Job,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: ImageResizePayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(JobType::ImageResize, e))?;

        tracing::info!(
            job_id = %job.id,
            image_url = %payload.image_url,
            sizes = ?payload.sizes,
            "resizing image"
        );

        // Download.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        }

        let format = if payload.format.is_empty() {
            "jpeg".to_string()
        } else {
            payload.format.clone()
        };

        let mut images = Vec::with_capacity(payload.sizes.len());
        for &width in &payload.sizes {
            let height = width * ORIGINAL_HEIGHT / ORIGINAL_WIDTH;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(u64::from(width / 100))) => {}
                _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
            }

            let ratio = f64::from(width) / f64::from(ORIGINAL_WIDTH);
            let size = (ORIGINAL_SIZE as f64 * ratio * ratio) as i64;

            images.push(ResizedImage {
                width,
                height,
                size,
                url: format!(
                    "{}/resized_{}x{}.{}",
                    payload.output_path, width, height, format
                ),
            });

            tracing::debug!(job_id = %job.id, width, height, size, "resized image");
        }

        let result = ImageResizeResult {
            original_url: payload.image_url,
            images,
            metadata: ImageMetadata {
                original_width: ORIGINAL_WIDTH,
                original_height: ORIGINAL_HEIGHT,
                original_size: ORIGINAL_SIZE,
                format: "JPEG".to_string(),
            },
        };

        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_image_resize_produces_one_image_per_size() {
        let req = JobRequest {
            job_type: "image_resize".to_string(),
            payload: json!({
                "image_url": "https://example.com/source.jpg",
                "sizes": [100, 300],
                "output_path": "/tmp/out"
            }),
            max_attempts: None,
            scheduled_at: None,
        };
        let job = Job::from_request(&req, JobType::ImageResize);
        let cancel = CancellationToken::new();

        let value = ImageResizeHandler.process(&cancel, &job).await.unwrap();
        let result: ImageResizeResult = serde_json::from_value(value).unwrap();

        assert_eq!(result.images.len(), 2);
        assert_eq!(result.original_url, "https://example.com/source.jpg");
        assert_eq!(result.images[0].width, 100);
        assert_eq!(result.images[0].height, 100 * 1080 / 1920);
        assert!(result.images[0].size < result.images[1].size);
        assert!(result.images[0].url.ends_with(".jpeg"));
    }
}
