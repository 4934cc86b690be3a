//! Boots the worker pool and owns its lifecycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::services::queue::JobQueue;
use crate::worker::registry::HandlerRegistry;
use crate::worker::Worker;

/// Delay between worker spawns so N workers do not hit the broker at once.
const STARTUP_STAGGER: Duration = Duration::from_millis(100);

pub struct Supervisor {
    queue: Arc<JobQueue>,
    db: PgPool,
    registry: Arc<HandlerRegistry>,
    worker_count: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        queue: Arc<JobQueue>,
        db: PgPool,
        registry: Arc<HandlerRegistry>,
        worker_count: usize,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            db,
            registry,
            worker_count,
            poll_interval,
            shutdown_timeout,
        }
    }

    /// Spawn the pool, wait for cancellation, then join the workers with a
    /// bounded timeout. Returns whether every worker exited within the bound.
    pub async fn run(&self, cancel: CancellationToken) -> bool {
        let mut workers = JoinSet::new();

        for _ in 0..self.worker_count {
            let worker = Worker::new(
                self.queue.clone(),
                self.db.clone(),
                self.registry.clone(),
                self.poll_interval,
            );
            let token = cancel.clone();

            workers.spawn(async move {
                let id = worker.id.clone();
                if let Err(e) = worker.run(token).await {
                    tracing::error!(worker_id = %id, error = %e, "worker stopped with error");
                }
            });

            tokio::time::sleep(STARTUP_STAGGER).await;
        }

        tracing::info!(count = self.worker_count, "worker pool started");
        metrics::gauge!("taskflow_workers_active").set(self.worker_count as f64);

        cancel.cancelled().await;
        tracing::info!("shutting down workers");

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("all workers shut down gracefully");
        } else {
            tracing::warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "forcing worker shutdown after timeout"
            );
            workers.abort_all();
        }

        metrics::gauge!("taskflow_workers_active").set(0.0);
        drained
    }
}
