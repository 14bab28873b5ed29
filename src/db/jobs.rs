//! Jobs database operations

use crate::db::models::{FanOutInsert, Job, JobType, NewRenderJob, StatusUpdate};
use crate::db::DbPool;
use crate::error::Result;
use std::time::Duration;
use uuid::Uuid;

/// Atomically claim the next eligible job of `job_type` and return it.
///
/// Eligible means `ready`, or `processing` with an expired lease (the previous
/// owner crashed or stalled). Selection and ownership change happen in one
/// statement, so concurrent workers never receive the same row.
pub async fn claim_next_job(
    pool: &DbPool,
    job_type: JobType,
    worker_id: &str,
    lease: Duration,
) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(
        r#"
        WITH next_job AS (
            SELECT id FROM jobs
            WHERE job_type = $1
              AND (status = 'ready'
                   OR (status = 'processing' AND lease_expires_at < NOW()))
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs
        SET status = 'processing',
            owner_id = $2,
            attempts = attempts + 1,
            claimed_at = NOW(),
            lease_expires_at = NOW() + make_interval(secs => $3),
            updated_at = NOW()
        WHERE id = (SELECT id FROM next_job)
        RETURNING *
        "#,
    )
    .bind(job_type.as_str())
    .bind(worker_id)
    .bind(lease.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Apply a filtered status update to a job
///
/// Returns false when no row matched (status or owner moved on).
pub async fn update_job_status(pool: &DbPool, job_id: Uuid, update: &StatusUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $2,
            output = COALESCE($3, output),
            error = COALESCE($4, error),
            lease_expires_at = CASE WHEN $2 IN ('done', 'failed') THEN NULL ELSE lease_expires_at END,
            updated_at = NOW()
        WHERE id = $1
          AND status = $5
          AND ($6::text IS NULL OR owner_id = $6)
        "#,
    )
    .bind(job_id)
    .bind(update.status.as_str())
    .bind(&update.output)
    .bind(&update.error)
    .bind(update.expected.as_str())
    .bind(&update.owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert a fan-out render job and its ready task in one transaction
///
/// Idempotent per `(parent_id, source_url)`: when the parent already has a
/// render job for this source (an earlier owner of the discovery job got that
/// far before its lease lapsed), nothing is written and the existing id is
/// returned.
pub async fn insert_render_job(pool: &DbPool, job: &NewRenderJob) -> Result<FanOutInsert> {
    let mut tx = pool.begin().await?;

    let created = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO jobs (job_type, status, parent_id, input)
        VALUES ($1, 'ready', $2, $3)
        ON CONFLICT (parent_id, (input->>'source_url')) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(job.job_type.as_str())
    .bind(job.parent_id)
    .bind(&job.input)
    .fetch_optional(&mut *tx)
    .await?;

    let job_id = match created {
        Some(id) => id,
        None => {
            let existing = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM jobs WHERE parent_id = $1 AND input->>'source_url' = $2",
            )
            .bind(job.parent_id)
            .bind(job.source_url())
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(FanOutInsert::Existing(existing));
        }
    };

    sqlx::query(
        r#"
        INSERT INTO tasks (job_id, status, input)
        VALUES ($1, 'ready', $2)
        "#,
    )
    .bind(job_id)
    .bind(&job.input)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(FanOutInsert::Created(job_id))
}

/// Insert a top-level discovery job
pub async fn insert_discovery_job(pool: &DbPool, input: &serde_json::Value) -> Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO jobs (job_type, status, input)
        VALUES ('discover', 'ready', $1)
        RETURNING id
        "#,
    )
    .bind(input)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Push the lease of an owned, in-flight job forward
pub async fn extend_job_lease(
    pool: &DbPool,
    job_id: Uuid,
    worker_id: &str,
    lease: Duration,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET lease_expires_at = NOW() + make_interval(secs => $3)
        WHERE id = $1
          AND owner_id = $2
          AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(lease.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Get a job by ID
pub async fn get_job_by_id(pool: &DbPool, job_id: Uuid) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// List jobs spawned by a discovery job
pub async fn get_child_jobs(pool: &DbPool, parent_id: Uuid) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE parent_id = $1 ORDER BY created_at ASC",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Count ready jobs of a kind for monitoring
pub async fn count_ready_jobs(pool: &DbPool, job_type: JobType) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM jobs WHERE job_type = $1 AND status = 'ready'",
    )
    .bind(job_type.as_str())
    .fetch_one(pool)
    .await?;

    Ok(count)
}
