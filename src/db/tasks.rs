//! Render task database operations

use crate::db::models::{LaggingParent, RenderTask, StatusUpdate};
use crate::db::DbPool;
use crate::error::Result;
use std::time::Duration;
use uuid::Uuid;

/// Claim the next render task through the `claim_next_task` stored function.
///
/// The function selects, locks, stamps `owner_id` and moves the parent job to
/// `processing` server-side in a single call.
pub async fn claim_next_task(
    pool: &DbPool,
    worker_id: &str,
    lease: Duration,
) -> Result<Option<RenderTask>> {
    let task = sqlx::query_as::<_, RenderTask>("SELECT * FROM claim_next_task($1, $2)")
        .bind(worker_id)
        .bind(lease.as_secs_f64())
        .fetch_optional(pool)
        .await?;

    Ok(task)
}

/// Apply a filtered status update to a task
pub async fn update_task_status(
    pool: &DbPool,
    task_id: Uuid,
    update: &StatusUpdate,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
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
    .bind(task_id)
    .bind(update.status.as_str())
    .bind(&update.output)
    .bind(&update.error)
    .bind(update.expected.as_str())
    .bind(&update.owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Push the lease of an owned, rendering task forward
pub async fn extend_task_lease(
    pool: &DbPool,
    task_id: Uuid,
    worker_id: &str,
    lease: Duration,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET lease_expires_at = NOW() + make_interval(secs => $3)
        WHERE id = $1
          AND owner_id = $2
          AND status = 'rendering'
        "#,
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(lease.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Jobs whose task reached a terminal state the job never mirrored
pub async fn find_lagging_parents(pool: &DbPool) -> Result<Vec<LaggingParent>> {
    let rows = sqlx::query_as::<_, LaggingParent>(
        r#"
        SELECT j.id AS job_id, j.status AS job_status,
               t.id AS task_id, t.status AS task_status
        FROM tasks t
        JOIN jobs j ON j.id = t.job_id
        WHERE t.status IN ('done', 'failed')
          AND j.status <> t.status
        ORDER BY t.updated_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Get a task by ID
pub async fn get_task_by_id(pool: &DbPool, task_id: Uuid) -> Result<Option<RenderTask>> {
    let task = sqlx::query_as::<_, RenderTask>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    Ok(task)
}
