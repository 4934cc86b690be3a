//! Type-keyed payload and result schemas for each job type.
//!
//! Every field defaults on deserialization; required-field enforcement lives
//! in `services::validation` so that a missing field and an empty field are
//! rejected the same way.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Payload for `email` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub html: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailResult {
    pub message_id: String,
    pub sent_at: String,
}

/// Payload for `image_resize` jobs. `sizes` are target widths in pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResizePayload {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub sizes: Vec<u32>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub preserve_meta: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResizeResult {
    pub original_url: String,
    pub images: Vec<ResizedImage>,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizedImage {
    pub width: u32,
    pub height: u32,
    /// File size in bytes.
    pub size: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub original_width: u32,
    pub original_height: u32,
    pub original_size: i64,
    pub format: String,
}

/// Payload for `webhook` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Timeout in seconds; overrides the handler's default client timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResult {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub duration_ms: i64,
}

/// Payload for `data_export` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataExportPayload {
    #[serde(default)]
    pub export_type: String,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub format: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataExportResult {
    pub file_path: String,
    pub file_size: i64,
    pub row_count: usize,
    pub format: String,
}
