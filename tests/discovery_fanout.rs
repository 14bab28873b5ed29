//! Discovery fan-out tests: one discover job in, render jobs out
//!
//! Run with: cargo test --test discovery_fanout

mod common;

use clip_worker::db::{FanOutInsert, ItemRef, JobType, MemoryStore, WorkStore};
use clip_worker::search::{ClipSearch, SimulatedSearch};
use clip_worker::worker::{render_job_for, DiscoveryProcessor, Lifecycle, WriteOutcome};
use std::collections::HashSet;
use common::{candidate, BrokenSearch, FixedSearch, FlakyStore, LEASE};
use serde_json::json;
use std::sync::Arc;

fn processor(store: Arc<dyn WorkStore>, search: Arc<dyn ClipSearch>) -> DiscoveryProcessor {
    processor_for(store, search, "d1")
}

fn processor_for(
    store: Arc<dyn WorkStore>,
    search: Arc<dyn ClipSearch>,
    worker_id: &str,
) -> DiscoveryProcessor {
    DiscoveryProcessor::new(store.clone(), Lifecycle::new(store, worker_id), search)
}

#[tokio::test]
async fn test_gaming_discovery_creates_ready_render_jobs() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_discovery_job(json!({ "category": "gaming" })).await;
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();

    let outcome = processor(store.clone(), Arc::new(SimulatedSearch::default()))
        .process_job(&job)
        .await;
    assert_eq!(outcome, WriteOutcome::Applied);

    let children = store.children_of(id).await;
    assert!(
        (3..=5).contains(&children.len()),
        "expected 3-5 render jobs, got {}",
        children.len()
    );

    for child in &children {
        assert_eq!(child.job_type, "render_clip");
        assert_eq!(child.status, "ready");
        assert_eq!(child.parent_id, Some(id));
        assert_eq!(child.input["job_type"], "render_clip");
        let platform = child.input["platform"].as_str().unwrap();
        assert!(
            ["youtube", "tiktok", "twitch", "instagram"].contains(&platform),
            "unexpected platform {}",
            platform
        );
        let score = child.input["viral_score"].as_u64().unwrap();
        assert!((70..=100).contains(&score), "score {} out of range", score);

        // Each render job is claimable by a render worker through its task
        let tasks = store.tasks_for(child.id).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, "ready");
        assert_eq!(tasks[0].job_type(), Some("render_clip"));
    }

    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "done");
    let output = job.output.unwrap();
    assert_eq!(output["candidates"].as_u64(), Some(children.len() as u64));
    assert_eq!(output["failed_inserts"], 0);
}

#[tokio::test]
async fn test_failed_insert_does_not_fail_discovery() {
    let inner = Arc::new(MemoryStore::new());
    let id = inner.insert_discovery_job(json!({ "category": "gaming" })).await;

    let mut flaky = FlakyStore::new(inner.clone());
    flaky.fail_insert_at = Some(2);
    let store: Arc<dyn WorkStore> = Arc::new(flaky);

    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();
    let search = Arc::new(FixedSearch(vec![candidate(1), candidate(2), candidate(3)]));

    let outcome = processor(store, search).process_job(&job).await;
    assert_eq!(outcome, WriteOutcome::Applied);

    let children = inner.children_of(id).await;
    assert_eq!(children.len(), 2);
    let titles: Vec<&str> = children
        .iter()
        .filter_map(|c| c.input["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Clutch play #1", "Clutch play #3"]);

    let job = inner.job(id).await.unwrap();
    assert_eq!(job.status, "done");
    let output = job.output.unwrap();
    assert_eq!(output["candidates"], 3);
    assert_eq!(output["failed_inserts"], 1);
    assert_eq!(output["inserted"].as_array().map(|a| a.len()), Some(2));
}

#[tokio::test]
async fn test_invalid_candidate_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_discovery_job(json!({})).await;
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();

    let mut bad = candidate(2);
    bad.viral_score = 140;
    let search = Arc::new(FixedSearch(vec![candidate(1), bad]));

    processor(store.clone(), search).process_job(&job).await;

    assert_eq!(store.children_of(id).await.len(), 1);
    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "done");
    assert_eq!(job.output.unwrap()["failed_inserts"], 1);
}

#[tokio::test]
async fn test_empty_discovery_is_done() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_discovery_job(json!({ "query": "nothing here" })).await;
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();

    processor(store.clone(), Arc::new(FixedSearch(Vec::new())))
        .process_job(&job)
        .await;

    assert!(store.children_of(id).await.is_empty());
    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "done");
    assert_eq!(job.output.unwrap()["candidates"], 0);
}

#[tokio::test]
async fn test_malformed_input_fails_job() {
    let store = Arc::new(MemoryStore::new());
    let id = store
        .insert_discovery_job(json!({ "platform": "myspace" }))
        .await;
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();

    let outcome = processor(store.clone(), Arc::new(SimulatedSearch::default()))
        .process_job(&job)
        .await;
    assert_eq!(outcome, WriteOutcome::Applied);

    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "failed");
    assert!(job.error.unwrap().contains("discovery input"));
    assert!(store.children_of(id).await.is_empty());
}

#[tokio::test]
async fn test_search_outage_fails_job() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_discovery_job(json!({ "category": "gaming" })).await;
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();

    processor(store.clone(), Arc::new(BrokenSearch))
        .process_job(&job)
        .await;

    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "failed");
    assert_eq!(
        job.error.as_deref(),
        Some("Discovery error: search backend unavailable")
    );
}

#[tokio::test]
async fn test_reclaimed_discovery_does_not_duplicate_render_jobs() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_discovery_job(json!({ "category": "gaming" })).await;
    let candidates = vec![candidate(1), candidate(2), candidate(3)];

    // d1 fans out every candidate, then dies before writing the job status
    let job = store
        .claim_next_job(JobType::Discover, "d1", LEASE)
        .await
        .unwrap()
        .unwrap();
    for c in &candidates {
        let inserted = store.insert_render_job(&render_job_for(job.id, c)).await.unwrap();
        assert!(matches!(inserted, FanOutInsert::Created(_)));
    }
    store.expire_lease(ItemRef::Job(id)).await;

    // d2 reclaims and reruns the same discovery
    let job = store
        .claim_next_job(JobType::Discover, "d2", LEASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.owner_id.as_deref(), Some("d2"));
    assert_eq!(job.attempts, 2);

    let outcome = processor_for(store.clone(), Arc::new(FixedSearch(candidates)), "d2")
        .process_job(&job)
        .await;
    assert_eq!(outcome, WriteOutcome::Applied);

    let children = store.children_of(id).await;
    assert_eq!(children.len(), 3);
    let sources: HashSet<&str> = children
        .iter()
        .filter_map(|c| c.input["source_url"].as_str())
        .collect();
    assert_eq!(sources.len(), 3);

    let mut task_count = 0;
    for child in &children {
        task_count += store.tasks_for(child.id).await.len();
    }
    assert_eq!(task_count, 3);

    let job = store.job(id).await.unwrap();
    assert_eq!(job.status, "done");
    let output = job.output.unwrap();
    assert_eq!(output["candidates"], 3);
    assert_eq!(output["already_present"], 3);
    assert_eq!(output["failed_inserts"], 0);
    assert_eq!(output["inserted"].as_array().map(|a| a.len()), Some(3));
}
