//! Worker heartbeat operations

use crate::db::models::Heartbeat;
use crate::db::DbPool;
use crate::error::Result;

/// Append a heartbeat row for a worker
pub async fn insert_heartbeat(pool: &DbPool, worker_id: &str, message: &str) -> Result<()> {
    sqlx::query("INSERT INTO worker_heartbeats (worker_id, message) VALUES ($1, $2)")
        .bind(worker_id)
        .bind(message)
        .execute(pool)
        .await?;

    Ok(())
}

/// Most recent heartbeat of every worker, newest first
pub async fn latest_heartbeats(pool: &DbPool) -> Result<Vec<Heartbeat>> {
    let rows = sqlx::query_as::<_, Heartbeat>(
        r#"
        SELECT * FROM (
            SELECT DISTINCT ON (worker_id) *
            FROM worker_heartbeats
            ORDER BY worker_id, created_at DESC
        ) latest
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
