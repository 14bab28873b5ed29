//! In-memory `WorkStore` with the same claim, lease and filter semantics as
//! the Postgres store. Used by the test suite and for local dry runs.

use crate::db::models::{
    FanOutInsert, Heartbeat, ItemRef, Job, JobType, LaggingParent, NewRenderJob, RenderTask,
    StatusUpdate, WorkStatus,
};
use crate::db::store::WorkStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as the tie-break for equal `created_at`
    jobs: Vec<Job>,
    tasks: Vec<RenderTask>,
    heartbeats: Vec<Heartbeat>,
    next_heartbeat_id: i64,
}

impl MemoryState {
    fn job_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn task_mut(&mut self, id: Uuid) -> Option<&mut RenderTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn push_job(
        &mut self,
        job_type: JobType,
        parent_id: Option<Uuid>,
        input: serde_json::Value,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.jobs.push(Job {
            id,
            owner_id: None,
            job_type: job_type.as_str().to_string(),
            status: WorkStatus::Ready.as_str().to_string(),
            parent_id,
            input,
            output: None,
            error: None,
            attempts: 0,
            claimed_at: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    fn push_task(&mut self, job_id: Uuid, input: serde_json::Value) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.tasks.push(RenderTask {
            id,
            job_id,
            owner_id: None,
            status: WorkStatus::Ready.as_str().to_string(),
            input,
            output: None,
            error: None,
            attempts: 0,
            claimed_at: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        });
        id
    }
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn is_claimable(
    status: &str,
    in_flight: WorkStatus,
    lease_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status == WorkStatus::Ready.as_str()
        || (status == in_flight.as_str() && lease_expires_at.is_some_and(|at| at < now))
}

fn matches_filter(status: &str, owner_id: Option<&str>, update: &StatusUpdate) -> bool {
    status == update.expected.as_str()
        && update
            .owner_id
            .as_deref()
            .map_or(true, |expected_owner| owner_id == Some(expected_owner))
}

/// In-memory queue store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a top-level discovery job
    pub async fn insert_discovery_job(&self, input: serde_json::Value) -> Uuid {
        self.state.lock().await.push_job(JobType::Discover, None, input)
    }

    /// Insert a job row without any task
    pub async fn insert_job(
        &self,
        job_type: JobType,
        parent_id: Option<Uuid>,
        input: serde_json::Value,
    ) -> Uuid {
        self.state.lock().await.push_job(job_type, parent_id, input)
    }

    /// Insert a ready task for an existing job
    pub async fn insert_task(&self, job_id: Uuid, input: serde_json::Value) -> Uuid {
        self.state.lock().await.push_task(job_id, input)
    }

    pub async fn job(&self, id: Uuid) -> Option<Job> {
        self.state.lock().await.jobs.iter().find(|j| j.id == id).cloned()
    }

    pub async fn task(&self, id: Uuid) -> Option<RenderTask> {
        self.state.lock().await.tasks.iter().find(|t| t.id == id).cloned()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn tasks(&self) -> Vec<RenderTask> {
        self.state.lock().await.tasks.clone()
    }

    /// Jobs fanned out from `parent_id`, in insertion order
    pub async fn children_of(&self, parent_id: Uuid) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|j| j.parent_id == Some(parent_id))
            .cloned()
            .collect()
    }

    pub async fn tasks_for(&self, job_id: Uuid) -> Vec<RenderTask> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect()
    }

    pub async fn heartbeats(&self) -> Vec<Heartbeat> {
        self.state.lock().await.heartbeats.clone()
    }

    /// Move an item's lease into the past, as if its owner had died
    pub async fn expire_lease(&self, item: ItemRef) {
        let expired = Some(Utc::now() - chrono::Duration::seconds(1));
        let mut state = self.state.lock().await;
        match item {
            ItemRef::Job(id) => {
                if let Some(job) = state.job_mut(id) {
                    job.lease_expires_at = expired;
                }
            }
            ItemRef::Task(id) => {
                if let Some(task) = state.task_mut(id) {
                    task.lease_expires_at = expired;
                }
            }
        }
    }
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn claim_next_job(
        &self,
        job_type: JobType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let next = state
            .jobs
            .iter_mut()
            .filter(|j| j.job_type == job_type.as_str())
            .filter(|j| is_claimable(&j.status, WorkStatus::Processing, j.lease_expires_at, now))
            .min_by_key(|j| j.created_at);

        Ok(next.map(|job| {
            job.status = WorkStatus::Processing.as_str().to_string();
            job.owner_id = Some(worker_id.to_string());
            job.attempts += 1;
            job.claimed_at = Some(now);
            job.lease_expires_at = Some(lease_deadline(now, lease));
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn claim_next_task(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<RenderTask>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let claimed = state
            .tasks
            .iter_mut()
            .filter(|t| is_claimable(&t.status, WorkStatus::Rendering, t.lease_expires_at, now))
            .min_by_key(|t| t.created_at)
            .map(|task| {
                task.status = WorkStatus::Rendering.as_str().to_string();
                task.owner_id = Some(worker_id.to_string());
                task.attempts += 1;
                task.claimed_at = Some(now);
                task.lease_expires_at = Some(lease_deadline(now, lease));
                task.updated_at = now;
                task.clone()
            });

        if let Some(task) = &claimed {
            if let Some(job) = state.job_mut(task.job_id) {
                if job.status == WorkStatus::Ready.as_str() || job.status == WorkStatus::Processing.as_str() {
                    job.status = WorkStatus::Processing.as_str().to_string();
                    job.owner_id = Some(worker_id.to_string());
                    job.attempts += 1;
                    job.claimed_at = Some(now);
                    job.lease_expires_at = task.lease_expires_at;
                    job.updated_at = now;
                }
            }
        }

        Ok(claimed)
    }

    async fn update_job_status(&self, job_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.job_mut(job_id) else {
            return Ok(false);
        };
        if !matches_filter(&job.status, job.owner_id.as_deref(), update) {
            return Ok(false);
        }

        job.status = update.status.as_str().to_string();
        if let Some(output) = &update.output {
            job.output = Some(output.clone());
        }
        if let Some(error) = &update.error {
            job.error = Some(error.clone());
        }
        if update.status.is_terminal() {
            job.lease_expires_at = None;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_task_status(&self, task_id: Uuid, update: &StatusUpdate) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.task_mut(task_id) else {
            return Ok(false);
        };
        if !matches_filter(&task.status, task.owner_id.as_deref(), update) {
            return Ok(false);
        }

        task.status = update.status.as_str().to_string();
        if let Some(output) = &update.output {
            task.output = Some(output.clone());
        }
        if let Some(error) = &update.error {
            task.error = Some(error.clone());
        }
        if update.status.is_terminal() {
            task.lease_expires_at = None;
        }
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_render_job(&self, job: &NewRenderJob) -> Result<FanOutInsert> {
        let mut state = self.state.lock().await;

        // Same key as the unique index on (parent_id, input->>'source_url')
        if let Some(source_url) = job.source_url() {
            let existing = state.jobs.iter().find(|j| {
                j.parent_id == Some(job.parent_id)
                    && j.input.get("source_url").and_then(|v| v.as_str()) == Some(source_url)
            });
            if let Some(existing) = existing {
                return Ok(FanOutInsert::Existing(existing.id));
            }
        }

        let job_id = state.push_job(job.job_type, Some(job.parent_id), job.input.clone());
        state.push_task(job_id, job.input.clone());
        Ok(FanOutInsert::Created(job_id))
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<RenderTask>> {
        Ok(self.task(task_id).await)
    }

    async fn extend_lease(&self, item: ItemRef, worker_id: &str, lease: Duration) -> Result<bool> {
        let deadline = Some(lease_deadline(Utc::now(), lease));
        let mut state = self.state.lock().await;

        let extended = match item {
            ItemRef::Job(id) => state
                .job_mut(id)
                .filter(|j| j.owner_id.as_deref() == Some(worker_id))
                .filter(|j| j.status == WorkStatus::Processing.as_str())
                .map(|j| j.lease_expires_at = deadline)
                .is_some(),
            ItemRef::Task(id) => state
                .task_mut(id)
                .filter(|t| t.owner_id.as_deref() == Some(worker_id))
                .filter(|t| t.status == WorkStatus::Rendering.as_str())
                .map(|t| t.lease_expires_at = deadline)
                .is_some(),
        };

        Ok(extended)
    }

    async fn insert_heartbeat(&self, worker_id: &str, message: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.next_heartbeat_id += 1;
        let id = state.next_heartbeat_id;
        state.heartbeats.push(Heartbeat {
            id,
            worker_id: worker_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn latest_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        let state = self.state.lock().await;
        let mut latest: Vec<Heartbeat> = Vec::new();
        for beat in state.heartbeats.iter().rev() {
            if !latest.iter().any(|b| b.worker_id == beat.worker_id) {
                latest.push(beat.clone());
            }
        }
        Ok(latest)
    }

    async fn find_lagging_parents(&self) -> Result<Vec<LaggingParent>> {
        let state = self.state.lock().await;
        let lagging = state
            .tasks
            .iter()
            .filter(|t| t.status == WorkStatus::Done.as_str() || t.status == WorkStatus::Failed.as_str())
            .filter_map(|t| {
                let job = state.jobs.iter().find(|j| j.id == t.job_id)?;
                (job.status != t.status).then(|| LaggingParent {
                    job_id: job.id,
                    job_status: job.status.clone(),
                    task_id: t.id,
                    task_status: t.status.clone(),
                })
            })
            .collect();
        Ok(lagging)
    }
}
