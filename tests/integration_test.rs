//! Integration tests for the broker and store.
//!
//! These require running PostgreSQL and Redis instances configured via
//! environment variables (DATABASE_URL, REDIS_ADDR, ...).
//!
//! Run with: cargo test --test integration_test -- --ignored

use std::time::Duration;

use serde_json::json;

use taskflow::config::AppConfig;
use taskflow::db::{self, queries};
use taskflow::models::job::{Job, JobRequest, JobStatus, JobType, Worker, WorkerStatus};
use taskflow::services::queue::{JobQueue, QueueError};

fn make_job(job_type: JobType, payload: serde_json::Value, max_attempts: i32) -> Job {
    let req = JobRequest {
        job_type: job_type.as_str().to_string(),
        payload,
        max_attempts: Some(max_attempts),
        scheduled_at: None,
    };
    Job::from_request(&req, job_type)
}

async fn setup() -> (JobQueue, sqlx::PgPool) {
    let config = AppConfig::from_env().expect("Failed to load config");

    let queue = JobQueue::new(&config.redis_addr, &config.redis_password, config.redis_db)
        .expect("Failed to initialize queue");
    queue.ping().await.expect("Redis unavailable");

    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Migrations failed");

    (queue, pool)
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_enqueue_lease_complete_lifecycle() {
    let (queue, pool) = setup().await;

    let job = make_job(
        JobType::Email,
        json!({"to": "a@b", "subject": "s", "body": "b"}),
        3,
    );
    queries::create_job(&pool, &job).await.expect("create failed");
    queue.enqueue_job(&job).await.expect("enqueue failed");

    // A single lease returns the job we enqueued, marked Processing.
    let leased = queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed")
        .expect("queue was empty");

    assert_eq!(leased.id, job.id);
    assert_eq!(leased.status, JobStatus::Processing);
    assert_eq!(leased.worker_id.as_deref(), Some("worker-test"));
    assert!(leased.started_at.is_some());

    // Complete it; the broker copy must carry the exact result.
    let result = json!({"message_id": "msg_1", "sent_at": "2026-01-01T00:00:00Z"});
    let completed = queue
        .complete_job(&job.id, result.clone())
        .await
        .expect("complete failed");

    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.result.as_ref(), Some(&result));
    assert_eq!(completed.attempts, 1);
    assert!(completed.completed_at.is_some());
    assert!(completed.updated_at >= completed.started_at.unwrap());
    assert!(completed.started_at.unwrap() >= completed.created_at);

    let fetched = queue.get_job(&job.id).await.expect("get failed");
    assert_eq!(fetched.status, JobStatus::Completed);
    assert_eq!(fetched.result, Some(result));
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_fail_within_budget_retries_and_then_exhausts() {
    let (queue, pool) = setup().await;

    let job = make_job(
        JobType::Webhook,
        json!({"url": "https://example.com/hook"}),
        2,
    );
    queries::create_job(&pool, &job).await.expect("create failed");
    queue.enqueue_job(&job).await.expect("enqueue failed");

    queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed")
        .expect("queue was empty");

    // First failure: attempts 1 of 2, parked for retry.
    let failed = queue
        .fail_job(&job.id, "connection refused")
        .await
        .expect("fail failed");
    assert_eq!(failed.status, JobStatus::Retrying);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_deref(), Some("connection refused"));
    assert!(failed.scheduled_at > failed.created_at);

    // The job is due in retry_delay(1) = 5s; promote once due and re-lease.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let promoted = queue.promote_due_jobs().await.expect("promote failed");
    assert!(promoted >= 1);

    let released = queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed")
        .expect("retried job not admitted");
    assert_eq!(released.id, job.id);

    // Second failure exhausts the budget.
    let exhausted = queue
        .fail_job(&job.id, "connection refused")
        .await
        .expect("fail failed");
    assert_eq!(exhausted.status, JobStatus::Failed);
    assert_eq!(exhausted.attempts, 2);
    assert!(exhausted.completed_at.is_some());
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_store_crud_and_pagination() {
    let (_, pool) = setup().await;

    let job = make_job(JobType::DataExport, json!({"export_type": "csv", "query": "q"}), 3);
    queries::create_job(&pool, &job).await.expect("create failed");

    // Duplicate id must be rejected.
    assert!(queries::create_job(&pool, &job).await.is_err());

    let fetched = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(fetched.id, job.id);
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.payload, job.payload);

    let mut updated = fetched.clone();
    updated.status = JobStatus::Processing;
    updated.worker_id = Some("worker-x".to_string());
    queries::update_job(&pool, &updated).await.expect("update failed");

    let after = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(after.status, JobStatus::Processing);
    assert_eq!(after.worker_id.as_deref(), Some("worker-x"));

    // Out-of-range page sizes fall back to the default of 20.
    let (jobs, total) = queries::list_jobs(&pool, 1, 500, None, None)
        .await
        .expect("list failed");
    assert!(jobs.len() <= 20);
    assert!(total >= 1);

    // Filtered count excludes other statuses.
    let (filtered, _) = queries::list_jobs(&pool, 1, 20, Some("processing"), None)
        .await
        .expect("list failed");
    assert!(filtered.iter().all(|j| j.status == JobStatus::Processing));
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_worker_upsert_is_last_writer_wins() {
    let (_, pool) = setup().await;

    let id = format!("worker-test-{}", taskflow::models::job::generate_job_id());

    let first = Worker {
        id: id.clone(),
        status: WorkerStatus::Starting,
        last_seen: chrono::Utc::now(),
        job_types: vec![JobType::Email],
        current_job: None,
    };
    queries::register_worker(&pool, &first).await.expect("register failed");

    let second = Worker {
        id: id.clone(),
        status: WorkerStatus::Processing,
        last_seen: chrono::Utc::now(),
        job_types: vec![JobType::Email, JobType::Webhook],
        current_job: Some("some-job".to_string()),
    };
    queries::register_worker(&pool, &second).await.expect("register failed");

    let workers = queries::list_workers(&pool).await.expect("list failed");
    let found = workers.iter().find(|w| w.id == id).expect("worker not listed");

    assert_eq!(found.status, WorkerStatus::Processing);
    assert_eq!(found.job_types.len(), 2);
    assert_eq!(found.current_job.as_deref(), Some("some-job"));
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_expired_record_lease_returns_none() {
    let (queue, _) = setup().await;

    // Push an id with no backing record; the lease must skip it rather than
    // stall the worker loop.
    let ghost = make_job(JobType::Email, json!({"to": "a@b", "subject": "s"}), 3);
    queue.readmit(&ghost.id).await.expect("readmit failed");

    let leased = queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed");
    assert!(leased.is_none());

    match queue.get_job(&ghost.id).await {
        Err(QueueError::JobNotFound(_)) => {}
        other => panic!("expected JobNotFound, got {other:?}"),
    }
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_concurrent_leases_return_distinct_jobs() {
    let (queue, pool) = setup().await;
    let queue = std::sync::Arc::new(queue);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let job = make_job(JobType::Email, json!({"to": "a@b", "subject": "s"}), 3);
        queries::create_job(&pool, &job).await.expect("create failed");
        queue.enqueue_job(&job).await.expect("enqueue failed");
        ids.push(job.id);
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .dequeue_job(&format!("worker-{i}"), Duration::from_secs(2))
                .await
                .expect("dequeue failed")
        }));
    }

    let mut leased: Vec<String> = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.expect("task panicked") {
            leased.push(job.id);
        }
    }

    // Every enqueued job is leased exactly once; no duplicates.
    leased.sort();
    let mut deduped = leased.clone();
    deduped.dedup();
    assert_eq!(leased.len(), deduped.len(), "duplicate lease detected");
    for id in &ids {
        assert!(leased.contains(id), "job {id} was never leased");
    }

    for id in &leased {
        queue.complete_job(id, json!({"ok": true})).await.expect("complete failed");
    }
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_single_attempt_budget_fails_terminally() {
    let (queue, pool) = setup().await;

    let job = make_job(JobType::Email, json!({"to": "a@b", "subject": "s"}), 1);
    queries::create_job(&pool, &job).await.expect("create failed");
    queue.enqueue_job(&job).await.expect("enqueue failed");

    queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed")
        .expect("queue was empty");

    // One attempt only: the first failure is terminal, even a retryable one.
    let failed = queue
        .fail_job(&job.id, "connection refused")
        .await
        .expect("fail failed");

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.completed_at.is_some());
    assert!(failed.error.is_some());
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_stats_counters_track_transitions() {
    let (queue, pool) = setup().await;

    let before = queue.get_stats().await.expect("stats failed");

    let job = make_job(JobType::Email, json!({"to": "a@b", "subject": "s"}), 3);
    queries::create_job(&pool, &job).await.expect("create failed");
    queue.enqueue_job(&job).await.expect("enqueue failed");

    let after_enqueue = queue.get_stats().await.expect("stats failed");
    assert_eq!(after_enqueue.total, before.total + 1);
    assert_eq!(after_enqueue.pending, before.pending + 1);

    queue
        .dequeue_job("worker-test", Duration::from_secs(2))
        .await
        .expect("dequeue failed")
        .expect("queue was empty");

    let after_lease = queue.get_stats().await.expect("stats failed");
    assert_eq!(after_lease.pending, before.pending);
    assert_eq!(after_lease.processing, before.processing + 1);

    queue
        .complete_job(&job.id, json!({"ok": true}))
        .await
        .expect("complete failed");

    let after_complete = queue.get_stats().await.expect("stats failed");
    assert_eq!(after_complete.processing, before.processing);
    assert_eq!(after_complete.completed, before.completed + 1);
}
