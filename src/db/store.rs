//! The storage seam shared by both worker roles

use crate::db::models::{
    FanOutInsert, Heartbeat, ItemRef, Job, JobType, LaggingParent, NewRenderJob, RenderTask,
    StatusUpdate,
};
use crate::db::{heartbeats, jobs, tasks, DbPool};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Transactional queue store
///
/// Every mutation is either an atomic claim or an update filtered by expected
/// status (and owner); implementations must never overwrite blindly.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Claim the oldest ready job of `job_type` (or one with an expired lease)
    async fn claim_next_job(
        &self,
        job_type: JobType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>>;

    /// Claim the oldest ready render task (or one with an expired lease) and
    /// move its parent job to `processing`
    async fn claim_next_task(&self, worker_id: &str, lease: Duration)
        -> Result<Option<RenderTask>>;

    /// Returns false when the filter matched no row
    async fn update_job_status(&self, job_id: Uuid, update: &StatusUpdate) -> Result<bool>;

    /// Returns false when the filter matched no row
    async fn update_task_status(&self, task_id: Uuid, update: &StatusUpdate) -> Result<bool>;

    /// Insert a ready render job plus its ready task, unless the parent
    /// already has a render job for the same `source_url`
    async fn insert_render_job(&self, job: &NewRenderJob) -> Result<FanOutInsert>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<RenderTask>>;

    /// Extend the lease on an item the worker still owns
    async fn extend_lease(&self, item: ItemRef, worker_id: &str, lease: Duration) -> Result<bool>;

    async fn insert_heartbeat(&self, worker_id: &str, message: &str) -> Result<()>;

    async fn latest_heartbeats(&self) -> Result<Vec<Heartbeat>>;

    async fn find_lagging_parents(&self) -> Result<Vec<LaggingParent>>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkStore for PgStore {
    async fn claim_next_job(
        &self,
        job_type: JobType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>> {
        jobs::claim_next_job(&self.pool, job_type, worker_id, lease).await
    }

    async fn claim_next_task(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<RenderTask>> {
        tasks::claim_next_task(&self.pool, worker_id, lease).await
    }

    async fn update_job_status(&self, job_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        jobs::update_job_status(&self.pool, job_id, update).await
    }

    async fn update_task_status(&self, task_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        tasks::update_task_status(&self.pool, task_id, update).await
    }

    async fn insert_render_job(&self, job: &NewRenderJob) -> Result<FanOutInsert> {
        jobs::insert_render_job(&self.pool, job).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<RenderTask>> {
        tasks::get_task_by_id(&self.pool, task_id).await
    }

    async fn extend_lease(&self, item: ItemRef, worker_id: &str, lease: Duration) -> Result<bool> {
        match item {
            ItemRef::Job(id) => jobs::extend_job_lease(&self.pool, id, worker_id, lease).await,
            ItemRef::Task(id) => tasks::extend_task_lease(&self.pool, id, worker_id, lease).await,
        }
    }

    async fn insert_heartbeat(&self, worker_id: &str, message: &str) -> Result<()> {
        heartbeats::insert_heartbeat(&self.pool, worker_id, message).await
    }

    async fn latest_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        heartbeats::latest_heartbeats(&self.pool).await
    }

    async fn find_lagging_parents(&self) -> Result<Vec<LaggingParent>> {
        tasks::find_lagging_parents(&self.pool).await
    }
}
