use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::models::job::{Job, JobStatus, JobType, Worker, WorkerStatus};

/// Workers silent for longer than this are considered dead and are not listed.
const WORKER_LIVENESS_WINDOW_MINS: i64 = 5;

const JOB_COLUMNS: &str = "id, type, payload, status, result, error, attempts, max_attempts, \
     created_at, updated_at, scheduled_at, started_at, completed_at, worker_id";

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status: JobStatus = status.parse().map_err(|e| decode_error("status", e))?;

    let job_type: String = row.try_get("type")?;
    let job_type: JobType = job_type.parse().map_err(|e| decode_error("type", e))?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type,
        payload: row.try_get("payload")?,
        status,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        worker_id: row.try_get("worker_id")?,
    })
}

/// Insert a new job; fails if the id collides.
pub async fn create_job(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, type, payload, status, result, error, attempts, max_attempts,
            created_at, updated_at, scheduled_at, started_at, completed_at, worker_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(&job.id)
    .bind(job.job_type.as_str())
    .bind(&job.payload)
    .bind(job.status.as_str())
    .bind(&job.result)
    .bind(&job.error)
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(job.created_at)
    .bind(job.updated_at)
    .bind(job.scheduled_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(&job.worker_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by id.
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Full-row update keyed by id.
pub async fn update_job(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            status = $2, result = $3, error = $4, attempts = $5,
            updated_at = $6, scheduled_at = $7, started_at = $8,
            completed_at = $9, worker_id = $10
        WHERE id = $1
        "#,
    )
    .bind(&job.id)
    .bind(job.status.as_str())
    .bind(&job.result)
    .bind(&job.error)
    .bind(job.attempts)
    .bind(job.updated_at)
    .bind(job.scheduled_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(&job.worker_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Floor the page number at 1.
pub fn normalize_page(page: i64) -> i64 {
    if page < 1 {
        1
    } else {
        page
    }
}

/// Page sizes outside [1, 100] fall back to the default of 20.
pub fn normalize_page_size(page_size: i64) -> i64 {
    if !(1..=100).contains(&page_size) {
        20
    } else {
        page_size
    }
}

fn push_job_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    status: Option<&str>,
    job_type: Option<&str>,
) {
    let mut separator = " WHERE ";
    if let Some(status) = status {
        builder
            .push(separator)
            .push("status = ")
            .push_bind(status.to_string());
        separator = " AND ";
    }
    if let Some(job_type) = job_type {
        builder
            .push(separator)
            .push("type = ")
            .push_bind(job_type.to_string());
    }
}

/// List jobs, newest first, with optional status/type filters. Returns the
/// page of jobs plus the pre-pagination filtered count.
pub async fn list_jobs(
    pool: &PgPool,
    page: i64,
    page_size: i64,
    status: Option<&str>,
    job_type: Option<&str>,
) -> Result<(Vec<Job>, i64), sqlx::Error> {
    let page = normalize_page(page);
    let page_size = normalize_page_size(page_size);
    let offset = (page - 1) * page_size;

    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
    push_job_filters(&mut count_builder, status, job_type);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
    push_job_filters(&mut builder, status, job_type);
    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page_size)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = builder.build().fetch_all(pool).await?;
    let jobs = rows
        .iter()
        .map(job_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((jobs, total))
}

/// Upsert a worker record; all mutable fields are overwritten.
pub async fn register_worker(pool: &PgPool, worker: &Worker) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workers (id, status, last_seen, job_types, current_job)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            last_seen = EXCLUDED.last_seen,
            job_types = EXCLUDED.job_types,
            current_job = EXCLUDED.current_job
        "#,
    )
    .bind(&worker.id)
    .bind(worker.status.as_str())
    .bind(worker.last_seen)
    .bind(sqlx::types::Json(&worker.job_types))
    .bind(&worker.current_job)
    .execute(pool)
    .await?;

    Ok(())
}

/// List workers seen within the liveness window, newest first.
pub async fn list_workers(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
    let cutoff: DateTime<Utc> =
        Utc::now() - chrono::Duration::minutes(WORKER_LIVENESS_WINDOW_MINS);

    let rows = sqlx::query(
        r#"
        SELECT id, status, last_seen, job_types, current_job
        FROM workers
        WHERE last_seen > $1
        ORDER BY last_seen DESC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.try_get("status")?;
            let status: WorkerStatus =
                status.parse().map_err(|e| decode_error("status", e))?;
            let job_types: sqlx::types::Json<Vec<JobType>> = row.try_get("job_types")?;

            Ok(Worker {
                id: row.try_get("id")?,
                status,
                last_seen: row.try_get("last_seen")?,
                job_types: job_types.0,
                current_job: row.try_get("current_job")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page(0), 1);
        assert_eq!(normalize_page(-3), 1);
        assert_eq!(normalize_page(1), 1);
        assert_eq!(normalize_page(7), 7);
    }

    #[test]
    fn test_normalize_page_size_clamps_to_default() {
        assert_eq!(normalize_page_size(0), 20);
        assert_eq!(normalize_page_size(-1), 20);
        assert_eq!(normalize_page_size(101), 20);
        assert_eq!(normalize_page_size(1), 1);
        assert_eq!(normalize_page_size(100), 100);
        assert_eq!(normalize_page_size(50), 50);
    }
}
