//! Postgres store tests
//!
//! These need a database with sql/schema.sql applied:
//!   DATABASE_URL=postgres://... cargo test --test pg_store -- --ignored

use clip_worker::db::{
    create_pool_from_env, jobs, DbPool, FanOutInsert, ItemRef, JobType, NewRenderJob,
    PgStore, StatusUpdate, WorkStatus, WorkStore,
};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(60);

async fn setup() -> (DbPool, PgStore) {
    dotenvy::dotenv().ok();
    let pool = create_pool_from_env().await.expect("DATABASE_URL must point at a test database");
    (pool.clone(), PgStore::new(pool))
}

async fn cleanup(pool: &DbPool, discover_id: Uuid) {
    sqlx::query(
        "DELETE FROM tasks WHERE job_id IN (SELECT id FROM jobs WHERE id = $1 OR parent_id = $1)",
    )
    .bind(discover_id)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("DELETE FROM jobs WHERE parent_id = $1")
        .bind(discover_id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(discover_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn test_fan_out_and_render_round() {
    let (pool, store) = setup().await;
    let discover_id = jobs::insert_discovery_job(&pool, &json!({ "category": "pg-test" }))
        .await
        .unwrap();

    let render_id = store
        .insert_render_job(&NewRenderJob {
            parent_id: discover_id,
            job_type: JobType::AiShort,
            input: json!({ "job_type": "ai_short", "prompt": "pg store test" }),
        })
        .await
        .unwrap()
        .job_id();

    let children = jobs::get_child_jobs(&pool, discover_id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, render_id);
    assert_eq!(children[0].status, "ready");

    // Other workers' tasks may be queued ahead of ours; claim until we find it
    let mut claimed = None;
    for _ in 0..50 {
        match store.claim_next_task("pg-test-render", LEASE).await.unwrap() {
            Some(task) if task.job_id == render_id => {
                claimed = Some(task);
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    let task = claimed.expect("render task was not claimable");
    assert_eq!(task.status, "rendering");

    let parent = jobs::get_job_by_id(&pool, render_id).await.unwrap().unwrap();
    assert_eq!(parent.status, "processing");
    assert_eq!(parent.owner_id.as_deref(), Some("pg-test-render"));

    assert!(store
        .extend_lease(ItemRef::Task(task.id), "pg-test-render", LEASE)
        .await
        .unwrap());
    assert!(!store
        .extend_lease(ItemRef::Task(task.id), "someone-else", LEASE)
        .await
        .unwrap());

    let done = StatusUpdate::transition(WorkStatus::Rendering, WorkStatus::Done)
        .unwrap()
        .owned_by("pg-test-render")
        .with_output(json!({ "video_url": "https://cdn.clips.local/shorts/x.mp4" }));
    assert!(store.update_task_status(task.id, &done).await.unwrap());
    // Same write again: no longer rendering, matches nothing
    assert!(!store.update_task_status(task.id, &done).await.unwrap());

    // The parent has not been mirrored yet
    let lagging = store.find_lagging_parents().await.unwrap();
    assert!(lagging.iter().any(|l| l.job_id == render_id));

    let task = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, "done");

    cleanup(&pool, discover_id).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_job_claim_is_exclusive() {
    let (pool, store) = setup().await;
    let id = jobs::insert_discovery_job(&pool, &json!({ "category": "pg-claim-test" }))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            jobs::claim_next_job(&pool, JobType::Discover, &format!("pg-test-{}", n), LEASE)
                .await
                .unwrap()
        }));
    }

    let mut owners = 0;
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            if job.id == id {
                owners += 1;
            }
        }
    }
    assert_eq!(owners, 1);

    let job = jobs::get_job_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status, "processing");
    assert_eq!(job.attempts, 1);

    store.insert_heartbeat("pg-test-0", "discovery worker alive (beat #1)").await.unwrap();
    let beats = store.latest_heartbeats().await.unwrap();
    assert!(beats.iter().any(|b| b.worker_id == "pg-test-0"));

    cleanup(&pool, id).await;
}

#[tokio::test]
#[ignore] // Requires database
async fn test_render_job_insert_is_unique_per_source() {
    let (pool, store) = setup().await;
    let discover_id = jobs::insert_discovery_job(&pool, &json!({ "category": "pg-dedup-test" }))
        .await
        .unwrap();
    let render = NewRenderJob {
        parent_id: discover_id,
        job_type: JobType::RenderClip,
        input: json!({
            "job_type": "render_clip",
            "source_url": "https://www.youtube.com/watch?v=pgdedup0001",
        }),
    };

    let first = store.insert_render_job(&render).await.unwrap();
    let again = store.insert_render_job(&render).await.unwrap();
    assert!(matches!(first, FanOutInsert::Created(_)));
    assert_eq!(again, FanOutInsert::Existing(first.job_id()));

    let children = jobs::get_child_jobs(&pool, discover_id).await.unwrap();
    assert_eq!(children.len(), 1);
    let task_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE job_id = $1")
        .bind(first.job_id())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(task_rows, 1);

    cleanup(&pool, discover_id).await;
}
