//! Worker: leases jobs from the broker, dispatches them to handlers, and
//! mirrors outcomes into the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::models::job::{Job, JobType, Worker as WorkerRecord, WorkerStatus};
use crate::services::queue::JobQueue;
use crate::services::validation::is_retryable_error;
use crate::worker::registry::HandlerRegistry;

pub mod handlers;
pub mod registry;
pub mod supervisor;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to register worker: {0}")]
    Register(#[source] sqlx::Error),
}

/// Snapshot of a worker's state shared with its heartbeat task.
type StateSnapshot = (WorkerStatus, Option<String>);

pub struct Worker {
    pub id: String,
    queue: Arc<JobQueue>,
    db: PgPool,
    registry: Arc<HandlerRegistry>,
    poll_interval: Duration,
    supported_types: Vec<JobType>,
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        db: PgPool,
        registry: Arc<HandlerRegistry>,
        poll_interval: Duration,
    ) -> Self {
        let id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let supported_types = registry.supported_types();

        Self {
            id,
            queue,
            db,
            registry,
            poll_interval,
            supported_types,
        }
    }

    /// Run the lease/dispatch/report loop until the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WorkerError> {
        tracing::info!(
            worker_id = %self.id,
            job_types = ?self.supported_types,
            "starting worker"
        );

        let (state_tx, state_rx) = watch::channel::<StateSnapshot>((WorkerStatus::Starting, None));

        self.upsert_record(WorkerStatus::Starting, None)
            .await
            .map_err(WorkerError::Register)?;

        self.spawn_heartbeat(state_rx, cancel.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let leased = tokio::select! {
                _ = cancel.cancelled() => break,
                leased = self.queue.dequeue_job(&self.id, self.poll_interval) => leased,
            };

            let job = match leased {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "failed to dequeue job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            tracing::info!(
                worker_id = %self.id,
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts + 1,
                "processing job"
            );

            self.set_state(&state_tx, WorkerStatus::Processing, Some(job.id.clone()))
                .await;

            self.process_leased_job(&job, &cancel).await;

            self.set_state(&state_tx, WorkerStatus::Idle, None).await;
        }

        tracing::info!(worker_id = %self.id, "worker shutting down");
        if let Err(e) = self.upsert_record(WorkerStatus::Stopped, None).await {
            tracing::warn!(worker_id = %self.id, error = %e, "failed to record stopped status");
        }

        Ok(())
    }

    /// Dispatch a leased job and report the outcome. A leased job is never
    /// dropped silently: every path out of here goes through `complete_job`
    /// or `fail_job`.
    async fn process_leased_job(&self, job: &Job, cancel: &CancellationToken) {
        let handler_cancel = cancel.child_token();
        let started = Instant::now();
        let outcome = self.registry.dispatch(&handler_cancel, job).await;
        let elapsed = started.elapsed();

        metrics::histogram!(
            "taskflow_job_processing_duration_seconds",
            "type" => job.job_type.as_str()
        )
        .record(elapsed.as_secs_f64());

        match outcome {
            Ok(result) => {
                tracing::info!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    duration_ms = elapsed.as_millis() as i64,
                    "job completed"
                );
                metrics::counter!(
                    "taskflow_jobs_total",
                    "type" => job.job_type.as_str(),
                    "status" => "completed"
                )
                .increment(1);

                match self.queue.complete_job(&job.id, result).await {
                    Ok(updated) => self.mirror_to_store(&updated).await,
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "failed to mark job completed");
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    duration_ms = elapsed.as_millis() as i64,
                    error = %message,
                    "job failed"
                );
                metrics::counter!(
                    "taskflow_jobs_total",
                    "type" => job.job_type.as_str(),
                    "status" => "failed"
                )
                .increment(1);

                if is_retryable_error(&message) && job.attempts + 1 < job.max_attempts {
                    tracing::info!(
                        job_id = %job.id,
                        attempt = job.attempts + 1,
                        max_attempts = job.max_attempts,
                        "transient failure, job will be retried"
                    );
                    metrics::counter!(
                        "taskflow_job_retries_total",
                        "type" => job.job_type.as_str()
                    )
                    .increment(1);
                }

                // The broker decides Retrying vs Failed; mirror its outcome.
                match self.queue.fail_job(&job.id, &message).await {
                    Ok(updated) => self.mirror_to_store(&updated).await,
                    Err(e) => {
                        tracing::error!(
                            job_id = %job.id,
                            error = %e,
                            "failed to record job failure; reaper will rescue the lease"
                        );
                    }
                }
            }
        }
    }

    /// Best-effort copy of the broker's outcome into the durable store. A
    /// mirroring failure is logged and does not revert the broker transition.
    async fn mirror_to_store(&self, job: &Job) {
        if let Err(e) = db::queries::update_job(&self.db, job).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to mirror job into store");
        }
    }

    async fn set_state(
        &self,
        state_tx: &watch::Sender<StateSnapshot>,
        status: WorkerStatus,
        current_job: Option<String>,
    ) {
        let _ = state_tx.send((status, current_job.clone()));
        if let Err(e) = self.upsert_record(status, current_job).await {
            tracing::warn!(worker_id = %self.id, error = %e, "failed to update worker status");
        }
    }

    async fn upsert_record(
        &self,
        status: WorkerStatus,
        current_job: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let record = WorkerRecord {
            id: self.id.clone(),
            status,
            last_seen: Utc::now(),
            job_types: self.supported_types.clone(),
            current_job,
        };
        db::queries::register_worker(&self.db, &record).await
    }

    /// Periodic liveness upsert. Reads the latest state snapshot so a
    /// heartbeat mid-job reports Processing with the current job id.
    fn spawn_heartbeat(&self, state_rx: watch::Receiver<StateSnapshot>, cancel: CancellationToken) {
        let id = self.id.clone();
        let db = self.db.clone();
        let job_types = self.supported_types.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let (status, current_job) = state_rx.borrow().clone();
                let record = WorkerRecord {
                    id: id.clone(),
                    status,
                    last_seen: Utc::now(),
                    job_types: job_types.clone(),
                    current_job,
                };

                if let Err(e) = db::queries::register_worker(&db, &record).await {
                    tracing::warn!(worker_id = %id, error = %e, "heartbeat upsert failed");
                }
            }
        });
    }
}
