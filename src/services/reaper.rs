//! Periodic recovery task for the broker.
//!
//! Three duties:
//! 1. Promote retrying jobs from the delayed set once their backoff is due
//!    (fast tick, so admission lands within a second of the deadline).
//! 2. Rescue ids stuck in `processing` whose record has gone stale, the
//!    signature of a worker that died between lease and outcome. The rescue
//!    is accounted as a failed attempt.
//! 3. Reconcile jobs that exist as Pending in the store but never made it
//!    into the broker (enqueue failed after the store insert).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::db;
use crate::models::job::JobStatus;
use crate::services::queue::{JobQueue, QueueError};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PROMOTE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_STALENESS_BOUND: Duration = Duration::from_secs(5 * 60);

pub struct Reaper {
    queue: Arc<JobQueue>,
    db: PgPool,
    /// Cadence of the stale-lease and reconcile scans.
    scan_interval: Duration,
    /// Cadence of delayed-set promotion.
    promote_interval: Duration,
    /// A `processing` entry whose record's `updated_at` is older than this is
    /// treated as a crashed lease.
    staleness_bound: Duration,
}

impl Reaper {
    pub fn new(queue: Arc<JobQueue>, db: PgPool) -> Self {
        Self {
            queue,
            db,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            promote_interval: DEFAULT_PROMOTE_INTERVAL,
            staleness_bound: DEFAULT_STALENESS_BOUND,
        }
    }

    pub fn with_staleness_bound(mut self, bound: Duration) -> Self {
        self.staleness_bound = bound;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Run until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            staleness_secs = self.staleness_bound.as_secs(),
            "reaper started"
        );

        let mut promote_tick = tokio::time::interval(self.promote_interval);
        let mut scan_tick = tokio::time::interval(self.scan_interval);
        promote_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        scan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("reaper shutting down");
                    return;
                }
                _ = promote_tick.tick() => {
                    match self.queue.promote_due_jobs().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(count = n, "admitted delayed jobs"),
                        Err(e) => tracing::error!(error = %e, "failed to promote delayed jobs"),
                    }
                }
                _ = scan_tick.tick() => {
                    if let Err(e) = self.rescue_stale_leases().await {
                        tracing::error!(error = %e, "stale-lease scan failed");
                    }
                    if let Err(e) = self.reconcile_unqueued_jobs().await {
                        tracing::error!(error = %e, "store reconcile failed");
                    }
                    self.record_depth_gauges().await;
                }
            }
        }
    }

    /// Fail (and thereby retry or terminate) every processing entry whose
    /// record has not been touched within the staleness bound.
    async fn rescue_stale_leases(&self) -> Result<(), QueueError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.staleness_bound).unwrap_or_default();

        for id in self.queue.processing_ids().await? {
            match self.queue.get_job(&id).await {
                Ok(job) => {
                    if job.status == JobStatus::Processing && job.updated_at < cutoff {
                        tracing::warn!(
                            job_id = %id,
                            worker_id = job.worker_id.as_deref().unwrap_or(""),
                            stale_secs = (Utc::now() - job.updated_at).num_seconds(),
                            "rescuing stale lease"
                        );
                        let rescued = self
                            .queue
                            .fail_job(&id, "lease expired: worker presumed crashed")
                            .await?;
                        if let Err(e) = db::queries::update_job(&self.db, &rescued).await {
                            tracing::error!(job_id = %id, error = %e, "failed to mirror rescued job");
                        }
                    }
                }
                Err(QueueError::JobNotFound(_)) => {
                    tracing::warn!(job_id = %id, "dropping processing entry with no record");
                    self.queue.remove_orphan(&id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Re-enqueue store-Pending jobs that are absent from the broker. Only
    /// jobs older than the staleness bound are touched, so freshly submitted
    /// work is never double-enqueued.
    async fn reconcile_unqueued_jobs(&self) -> Result<(), sqlx::Error> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.staleness_bound).unwrap_or_default();

        let (jobs, _) =
            db::queries::list_jobs(&self.db, 1, 100, Some(JobStatus::Pending.as_str()), None)
                .await?;

        for job in jobs {
            if job.updated_at >= cutoff {
                continue;
            }

            match self.queue.get_job(&job.id).await {
                Ok(_) => {
                    // Record exists; readmit only if it fell out of every queue.
                    match self.queue.is_queued(&job.id).await {
                        Ok(false) => {
                            tracing::warn!(job_id = %job.id, "readmitting job lost from queue");
                            if let Err(e) = self.queue.readmit(&job.id).await {
                                tracing::error!(job_id = %job.id, error = %e, "readmit failed");
                            }
                        }
                        Ok(true) => {}
                        Err(e) => {
                            tracing::error!(job_id = %job.id, error = %e, "queue membership check failed");
                        }
                    }
                }
                Err(QueueError::JobNotFound(_)) => {
                    tracing::warn!(job_id = %job.id, "re-enqueueing job missing from broker");
                    if let Err(e) = self.queue.enqueue_job(&job).await {
                        tracing::error!(job_id = %job.id, error = %e, "re-enqueue failed");
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "broker lookup failed during reconcile");
                }
            }
        }

        Ok(())
    }

    async fn record_depth_gauges(&self) {
        if let Ok(depth) = self.queue.queue_depth().await {
            metrics::gauge!("taskflow_jobs_in_queue").set(depth as f64);
        }
        if let Ok(depth) = self.queue.processing_depth().await {
            metrics::gauge!("taskflow_jobs_processing").set(depth as f64);
        }
    }
}
