//! Redis-backed job broker.
//!
//! Key space:
//! - `taskflow:jobs:pending`    — list of job ids awaiting a lease (FIFO)
//! - `taskflow:jobs:processing` — ids currently leased to a worker
//! - `taskflow:jobs:delayed`    — sorted set of retrying ids scored by due time
//! - `taskflow:job:<id>`        — serialized job record, 24 h TTL
//! - `taskflow:stats`           — aggregate counters
//!
//! Multi-key transitions go through `redis::pipe().atomic()` so a transition
//! either fully applies or not at all.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use thiserror::Error;

use crate::models::job::{Job, JobStats, JobStatus};

const PENDING_KEY: &str = "taskflow:jobs:pending";
const PROCESSING_KEY: &str = "taskflow:jobs:processing";
const DELAYED_KEY: &str = "taskflow:jobs:delayed";
const JOB_KEY_PREFIX: &str = "taskflow:job:";
const STATS_KEY: &str = "taskflow:stats";

/// Job records expire from the broker 24 h after their last write. The store
/// keeps the durable history.
const JOB_TTL_SECS: u64 = 24 * 60 * 60;

fn job_key(id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

/// Exponential backoff for retry number `attempts`: 5s, 10s, 20s, ... capped
/// at 5 minutes.
pub fn retry_delay(attempts: u32) -> Duration {
    let base = Duration::from_secs(5);
    let delay = base * 2u32.saturating_pow(attempts.saturating_sub(1));
    delay.min(Duration::from_secs(300))
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Redis-backed broker for the job lifecycle state machine.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    /// Connect to Redis at `addr` (host:port) using logical database `db`.
    pub fn new(addr: &str, password: &str, db: i64) -> Result<Self, QueueError> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        let client = redis::Client::open(url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Stage the job record and push its id onto the pending queue.
    pub async fn enqueue_job(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let data = serde_json::to_string(job)?;

        let _: () = redis::pipe()
            .atomic()
            .set_ex(job_key(&job.id), &data, JOB_TTL_SECS)
            .ignore()
            .lpush(PENDING_KEY, &job.id)
            .ignore()
            .hincr(STATS_KEY, "total", 1)
            .ignore()
            .hincr(STATS_KEY, "pending", 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Lease the next job for `worker_id`, blocking up to `timeout`.
    ///
    /// Atomically moves the tail of `pending` to `processing`, then marks the
    /// record Processing and assigns the worker. Returns `None` on timeout, or
    /// when the popped id has no record left (expired); in that case the id is
    /// dropped from `processing` so the caller's loop does not stall.
    pub async fn dequeue_job(
        &self,
        worker_id: &str,
        timeout: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn().await?;

        let id: Option<String> = conn
            .brpoplpush(PENDING_KEY, PROCESSING_KEY, timeout.as_secs_f64())
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let mut job = match self.get_job(&id).await {
            Ok(job) => job,
            Err(QueueError::JobNotFound(_)) => {
                let _: () = conn.lrem(PROCESSING_KEY, 1, &id).await?;
                tracing::warn!(job_id = %id, "leased id has no job record, dropping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // A cancelled-then-settled job can leave a stale queue entry behind.
        if job.status.is_terminal() {
            let _: () = conn.lrem(PROCESSING_KEY, 1, &id).await?;
            tracing::warn!(job_id = %id, status = %job.status, "dropping lease for terminal job");
            return Ok(None);
        }

        let now = Utc::now();
        job.status = JobStatus::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.updated_at = now;

        let data = serde_json::to_string(&job)?;
        let _: () = redis::pipe()
            .atomic()
            .set_ex(job_key(&job.id), &data, JOB_TTL_SECS)
            .ignore()
            .hincr(STATS_KEY, "pending", -1)
            .ignore()
            .hincr(STATS_KEY, "processing", 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(Some(job))
    }

    /// Fetch a job record by id.
    pub async fn get_job(&self, id: &str) -> Result<Job, QueueError> {
        let mut conn = self.conn().await?;
        let data: Option<String> = conn.get(job_key(id)).await?;

        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(QueueError::JobNotFound(id.to_string())),
        }
    }

    /// Overwrite a job record, refreshing its TTL.
    pub async fn update_job(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let data = serde_json::to_string(job)?;
        let _: () = conn.set_ex(job_key(&job.id), data, JOB_TTL_SECS).await?;
        Ok(())
    }

    /// Mark a job Completed with its result and release the lease. Returns the
    /// post-transition job.
    pub async fn complete_job(
        &self,
        id: &str,
        result: serde_json::Value,
    ) -> Result<Job, QueueError> {
        let mut job = self.get_job(id).await?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.error = None;
        // A successful pass counts as an attempt, same as a failed one.
        job.attempts += 1;
        job.completed_at = Some(now);
        job.updated_at = now;

        let mut conn = self.conn().await?;
        let data = serde_json::to_string(&job)?;
        let _: () = redis::pipe()
            .atomic()
            .set_ex(job_key(&job.id), &data, JOB_TTL_SECS)
            .ignore()
            .lrem(PROCESSING_KEY, 1, &job.id)
            .ignore()
            .hincr(STATS_KEY, "processing", -1)
            .ignore()
            .hincr(STATS_KEY, "completed", 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(job)
    }

    /// Record a failed attempt and release the lease.
    ///
    /// Within the retry budget the job becomes Retrying and is parked in the
    /// delayed set until `now + retry_delay(attempts)`; otherwise it becomes
    /// terminally Failed. Returns the post-transition job so callers can
    /// mirror the authoritative outcome.
    pub async fn fail_job(&self, id: &str, error_message: &str) -> Result<Job, QueueError> {
        let mut job = self.get_job(id).await?;

        let now = Utc::now();
        job.attempts += 1;
        job.error = Some(error_message.to_string());
        job.updated_at = now;

        let mut conn = self.conn().await?;

        if job.attempts < job.max_attempts {
            let delay = retry_delay(job.attempts as u32);
            let due = now + chrono::Duration::from_std(delay).unwrap_or_default();
            job.status = JobStatus::Retrying;
            job.scheduled_at = due;

            let data = serde_json::to_string(&job)?;
            let _: () = redis::pipe()
                .atomic()
                .set_ex(job_key(&job.id), &data, JOB_TTL_SECS)
                .ignore()
                .lrem(PROCESSING_KEY, 1, &job.id)
                .ignore()
                .zadd(DELAYED_KEY, &job.id, due.timestamp_millis())
                .ignore()
                .hincr(STATS_KEY, "processing", -1)
                .ignore()
                .hincr(STATS_KEY, "pending", 1)
                .ignore()
                .query_async(&mut conn)
                .await?;
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);

            let data = serde_json::to_string(&job)?;
            let _: () = redis::pipe()
                .atomic()
                .set_ex(job_key(&job.id), &data, JOB_TTL_SECS)
                .ignore()
                .lrem(PROCESSING_KEY, 1, &job.id)
                .ignore()
                .hincr(STATS_KEY, "processing", -1)
                .ignore()
                .hincr(STATS_KEY, "failed", 1)
                .ignore()
                .query_async(&mut conn)
                .await?;
        }

        Ok(job)
    }

    /// Move due ids from the delayed set back onto the pending queue. Returns
    /// the number of jobs admitted. The pending counter was already bumped
    /// when the job entered the delayed set.
    pub async fn promote_due_jobs(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now, 0, 100)
            .await?;

        for id in &due {
            let _: () = redis::pipe()
                .atomic()
                .zrem(DELAYED_KEY, id)
                .ignore()
                .lpush(PENDING_KEY, id)
                .ignore()
                .query_async(&mut conn)
                .await?;
        }

        Ok(due.len())
    }

    /// Ids currently in the processing set.
    pub async fn processing_ids(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(PROCESSING_KEY, 0, -1).await?)
    }

    /// Drop an id from `processing` whose record no longer exists.
    pub async fn remove_orphan(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .lrem(PROCESSING_KEY, 1, id)
            .ignore()
            .hincr(STATS_KEY, "processing", -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Whether the id is anywhere in the broker's queue structures.
    pub async fn is_queued(&self, id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn().await?;

        let pending_pos: Option<i64> = redis::cmd("LPOS")
            .arg(PENDING_KEY)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        if pending_pos.is_some() {
            return Ok(true);
        }

        let delayed: Option<f64> = conn.zscore(DELAYED_KEY, id).await?;
        if delayed.is_some() {
            return Ok(true);
        }

        let processing_pos: Option<i64> = redis::cmd("LPOS")
            .arg(PROCESSING_KEY)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(processing_pos.is_some())
    }

    /// Push a known id back onto the pending queue without touching counters.
    /// Used by the reaper to readmit a job whose queue entry was lost.
    pub async fn readmit(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(PENDING_KEY, id).await?;
        Ok(())
    }

    /// Read the aggregate counters.
    pub async fn get_stats(&self) -> Result<JobStats, QueueError> {
        let mut conn = self.conn().await?;
        let map: std::collections::HashMap<String, i64> = conn.hgetall(STATS_KEY).await?;

        Ok(JobStats {
            total: map.get("total").copied().unwrap_or(0),
            pending: map.get("pending").copied().unwrap_or(0),
            processing: map.get("processing").copied().unwrap_or(0),
            completed: map.get("completed").copied().unwrap_or(0),
            failed: map.get("failed").copied().unwrap_or(0),
        })
    }

    /// Number of ids waiting in the pending queue.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(PENDING_KEY).await?)
    }

    /// Number of ids currently leased.
    pub async fn processing_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(PROCESSING_KEY).await?)
    }

    /// Check Redis connectivity.
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}
