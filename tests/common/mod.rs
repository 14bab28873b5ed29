//! Shared fixtures for the worker integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use clip_worker::db::{
    FanOutInsert, Heartbeat, ItemRef, Job, JobType, LaggingParent, MemoryStore, NewRenderJob,
    RenderTask, StatusUpdate, WorkStore,
};
use clip_worker::error::{Result, WorkerError};
use clip_worker::search::{CandidateClip, ClipSearch, Platform};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const LEASE: Duration = Duration::from_secs(60);

/// A MemoryStore that can be told to fail selected calls
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    /// 1-based index of the render job insert that fails
    pub fail_insert_at: Option<usize>,
    /// Number of leading heartbeat inserts that fail
    pub failing_heartbeats: usize,
    /// Number of leading claims that fail
    pub failing_claims: usize,
    /// Task writes succeed; parent job writes report no matching row
    pub drop_parent_writes: bool,
    inserts: AtomicUsize,
    heartbeats: AtomicUsize,
    claims: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_insert_at: None,
            failing_heartbeats: 0,
            failing_claims: 0,
            drop_parent_writes: false,
            inserts: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
        }
    }

    pub fn claim_attempts(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    fn claim_fails(&self) -> bool {
        self.claims.fetch_add(1, Ordering::SeqCst) < self.failing_claims
    }
}

#[async_trait]
impl WorkStore for FlakyStore {
    async fn claim_next_job(
        &self,
        job_type: JobType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>> {
        if self.claim_fails() {
            return Err(WorkerError::StoreError("connection refused".to_string()));
        }
        self.inner.claim_next_job(job_type, worker_id, lease).await
    }

    async fn claim_next_task(&self, worker_id: &str, lease: Duration) -> Result<Option<RenderTask>> {
        if self.claim_fails() {
            return Err(WorkerError::StoreError("connection refused".to_string()));
        }
        self.inner.claim_next_task(worker_id, lease).await
    }

    async fn update_job_status(&self, job_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        if self.drop_parent_writes {
            let is_parent_of_task = !self.inner.tasks_for(job_id).await.is_empty();
            if is_parent_of_task {
                return Ok(false);
            }
        }
        self.inner.update_job_status(job_id, update).await
    }

    async fn update_task_status(&self, task_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        self.inner.update_task_status(task_id, update).await
    }

    async fn insert_render_job(&self, job: &NewRenderJob) -> Result<FanOutInsert> {
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert_at == Some(n) {
            return Err(WorkerError::StoreError(format!("insert #{} rejected", n)));
        }
        self.inner.insert_render_job(job).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<RenderTask>> {
        self.inner.get_task(task_id).await
    }

    async fn extend_lease(&self, item: ItemRef, worker_id: &str, lease: Duration) -> Result<bool> {
        self.inner.extend_lease(item, worker_id, lease).await
    }

    async fn insert_heartbeat(&self, worker_id: &str, message: &str) -> Result<()> {
        if self.heartbeats.fetch_add(1, Ordering::SeqCst) < self.failing_heartbeats {
            return Err(WorkerError::StoreError("heartbeat table unavailable".to_string()));
        }
        self.inner.insert_heartbeat(worker_id, message).await
    }

    async fn latest_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        self.inner.latest_heartbeats().await
    }

    async fn find_lagging_parents(&self) -> Result<Vec<LaggingParent>> {
        self.inner.find_lagging_parents().await
    }
}

/// Search that always returns the same candidates
pub struct FixedSearch(pub Vec<CandidateClip>);

#[async_trait]
impl ClipSearch for FixedSearch {
    async fn search(
        &self,
        _platform: Option<Platform>,
        _query: Option<&str>,
        _category: Option<&str>,
    ) -> Result<Vec<CandidateClip>> {
        Ok(self.0.clone())
    }
}

/// Search backend that is down
pub struct BrokenSearch;

#[async_trait]
impl ClipSearch for BrokenSearch {
    async fn search(
        &self,
        _platform: Option<Platform>,
        _query: Option<&str>,
        _category: Option<&str>,
    ) -> Result<Vec<CandidateClip>> {
        Err(WorkerError::DiscoveryError("search backend unavailable".to_string()))
    }
}

pub fn candidate(n: u8) -> CandidateClip {
    CandidateClip {
        title: format!("Clutch play #{}", n),
        source_url: format!("https://www.youtube.com/watch?v=clip{:07}", n),
        platform: Platform::Youtube,
        viral_score: 80 + n,
        duration_seconds: Some(30),
        thumbnail_url: None,
    }
}
