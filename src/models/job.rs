use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    /// Terminal jobs cannot transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

/// The closed set of job types the system can process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Email,
    ImageResize,
    Webhook,
    DataExport,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Email => "email",
            JobType::ImageResize => "image_resize",
            JobType::Webhook => "webhook",
            JobType::DataExport => "data_export",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("invalid job type: {0}")]
pub struct ParseJobTypeError(pub String);

impl FromStr for JobType {
    type Err = ParseJobTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(JobType::Email),
            "image_resize" => Ok(JobType::ImageResize),
            "webhook" => Ok(JobType::Webhook),
            "data_export" => Ok(JobType::DataExport),
            other => Err(ParseJobTypeError(other.to_string())),
        }
    }
}

/// A background job. The broker holds the live copy during an attempt; the
/// store holds the canonical history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    /// Build a Pending job from a validated request. `job_type` comes from
    /// `validation::validate_job_request`, which has already resolved the tag.
    pub fn from_request(req: &JobRequest, job_type: JobType) -> Job {
        let now = Utc::now();

        Job {
            id: generate_job_id(),
            job_type,
            payload: req.payload.clone(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            max_attempts: req.max_attempts.filter(|&m| m > 0).unwrap_or(3),
            created_at: now,
            updated_at: now,
            scheduled_at: req.scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }
}

/// Generate a unique job id: 16 random bytes from the OS RNG, hex-encoded.
pub fn generate_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A request to create a new job. The `type` tag stays a raw string here so
/// an unknown tag surfaces as a validation error rather than a JSON decode
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Response envelope for single-job endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status of a worker process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Processing,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown worker status: {0}")]
pub struct ParseWorkerStatusError(String);

impl FromStr for WorkerStatus {
    type Err = ParseWorkerStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(WorkerStatus::Starting),
            "idle" => Ok(WorkerStatus::Idle),
            "processing" => Ok(WorkerStatus::Processing),
            "stopped" => Ok(WorkerStatus::Stopped),
            other => Err(ParseWorkerStatusError(other.to_string())),
        }
    }
}

/// A worker instance as recorded in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
    pub job_types: Vec<JobType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<String>,
}

/// Aggregate counters maintained by the broker. An approximation used for
/// `GET /stats`; consumers treat it as a gauge, not a ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}
