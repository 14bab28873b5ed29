//! Owner-side status transitions
//!
//! Every terminal write a worker makes goes through [`Lifecycle`]: the
//! transition is checked against the state machine, then sent as an update
//! filtered on the expected in-flight status and on this worker's ownership.
//! Write failures are logged and reported, never retried.

use crate::db::{ItemRef, Job, RenderTask, StatusUpdate, WorkItem, WorkStatus, WorkStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row moved to the new status
    Applied,
    /// No row matched: the item is no longer in flight or no longer ours
    Skipped,
    /// The write was rejected by the state machine or the store
    Failed(String),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Outcome of finishing a task and mirroring it onto the parent job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishReport {
    pub status: WorkStatus,
    pub task: WriteOutcome,
    /// `None` when the task write did not apply and the parent was left alone
    pub parent: Option<WriteOutcome>,
}

impl FinishReport {
    /// True unless the task moved but its parent job did not follow
    pub fn is_consistent(&self) -> bool {
        !self.task.is_applied() || matches!(self.parent, Some(WriteOutcome::Applied))
    }
}

/// Enforces the job/task state machine for the items a worker owns
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn WorkStore>,
    worker_id: String,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn WorkStore>, worker_id: &str) -> Self {
        Self {
            store,
            worker_id: worker_id.to_string(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Move a claimed job to `done` (with output) or `failed` (with the cause)
    pub async fn finish_job(
        &self,
        job: &Job,
        result: std::result::Result<serde_json::Value, String>,
    ) -> WriteOutcome {
        let (status, update) = match terminal_update(WorkStatus::Processing, result) {
            Ok(pair) => pair,
            Err(e) => return WriteOutcome::Failed(e),
        };
        let update = update.owned_by(&self.worker_id);

        let outcome = self.write(ItemRef::Job(job.id), &update).await;
        match (&outcome, status) {
            (WriteOutcome::Applied, WorkStatus::Done) => {
                info!("[{}] Job {} done", self.worker_id, job.id)
            }
            (WriteOutcome::Applied, _) => warn!(
                "[{}] Job {} failed: {}",
                self.worker_id,
                job.id,
                update.error.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }
        outcome
    }

    /// Move a claimed task to its terminal status and mirror it onto the
    /// parent job.
    ///
    /// The two writes are sequential. When the task write applies but the
    /// parent write does not, the parent is left lagging; that is logged here
    /// and visible later through `WorkStore::find_lagging_parents`.
    pub async fn finish_task(
        &self,
        task: &RenderTask,
        result: std::result::Result<serde_json::Value, String>,
    ) -> FinishReport {
        let (status, task_update) = match terminal_update(WorkStatus::Rendering, result) {
            Ok(pair) => pair,
            Err(e) => {
                return FinishReport {
                    status: WorkStatus::Failed,
                    task: WriteOutcome::Failed(e),
                    parent: None,
                }
            }
        };
        let task_update = task_update.owned_by(&self.worker_id);

        let task_outcome = self.write(ItemRef::Task(task.id), &task_update).await;
        if !task_outcome.is_applied() {
            return FinishReport {
                status,
                task: task_outcome,
                parent: None,
            };
        }

        match status {
            WorkStatus::Done => info!("[{}] Task {} done", self.worker_id, task.id),
            _ => warn!(
                "[{}] Task {} failed: {}",
                self.worker_id,
                task.id,
                task_update.error.as_deref().unwrap_or("unknown error")
            ),
        }

        let parent_outcome = self
            .mirror_onto_parent(task, status, task_update.output.clone(), task_update.error.clone())
            .await;

        if !parent_outcome.is_applied() {
            error!(
                "[{}] Task {} is {} but parent job {} was not updated ({:?}); job status now lags its task",
                self.worker_id, task.id, status, task.job_id, parent_outcome
            );
        }

        FinishReport {
            status,
            task: task_outcome,
            parent: Some(parent_outcome),
        }
    }

    /// Fail whatever item this is with `reason`
    ///
    /// A task whose own terminal write already landed (the processor finished
    /// it just as the timeout fired) is not failed; its stored outcome is
    /// mirrored onto the parent job instead.
    pub async fn abandon(&self, item: &WorkItem, reason: &str) {
        match item {
            WorkItem::Job(job) => {
                self.finish_job(job, Err(reason.to_string())).await;
            }
            WorkItem::Task(task) => {
                let report = self.finish_task(task, Err(reason.to_string())).await;
                if report.task == WriteOutcome::Skipped {
                    self.reconcile_parent(task).await;
                }
            }
        }
    }

    /// Bring the parent job in line with a task this worker already finished
    async fn reconcile_parent(&self, task: &RenderTask) {
        let stored = match self.store.get_task(task.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                error!(
                    "[{}] Could not re-read task {} to reconcile job {}: {}",
                    self.worker_id, task.id, task.job_id, e
                );
                return;
            }
        };

        let Some(status) = stored.status().ok().filter(|s| s.is_terminal()) else {
            return;
        };
        if stored.owner_id.as_deref() != Some(self.worker_id.as_str()) {
            return;
        }

        info!(
            "[{}] Task {} already {}; mirroring onto job {}",
            self.worker_id, task.id, status, task.job_id
        );
        // Skipped here means the parent was already mirrored
        if let WriteOutcome::Failed(e) = self
            .mirror_onto_parent(task, status, stored.output, stored.error)
            .await
        {
            error!(
                "[{}] Task {} is {} but parent job {} was not updated ({}); job status now lags its task",
                self.worker_id, task.id, status, task.job_id, e
            );
        }
    }

    /// The parent job mirrors the task: same status, same payload
    async fn mirror_onto_parent(
        &self,
        task: &RenderTask,
        status: WorkStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> WriteOutcome {
        match StatusUpdate::transition(WorkStatus::Processing, status) {
            Ok(update) => {
                let mut update = update.owned_by(&self.worker_id);
                update.output = output;
                update.error = error;
                self.write(ItemRef::Job(task.job_id), &update).await
            }
            Err(e) => WriteOutcome::Failed(e.to_string()),
        }
    }

    async fn write(&self, item: ItemRef, update: &StatusUpdate) -> WriteOutcome {
        let result = match item {
            ItemRef::Job(id) => self.store.update_job_status(id, update).await,
            ItemRef::Task(id) => self.store.update_task_status(id, update).await,
        };

        match result {
            Ok(true) => WriteOutcome::Applied,
            Ok(false) => {
                warn!(
                    "[{}] Status write {} -> {} on {} matched no row (no longer owned or already final)",
                    self.worker_id, update.expected, update.status, item
                );
                WriteOutcome::Skipped
            }
            Err(e) => {
                error!(
                    "[{}] Failed to write status {} on {}: {}",
                    self.worker_id, update.status, item, e
                );
                WriteOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Build the terminal update for an in-flight item from its processing result
fn terminal_update(
    from: WorkStatus,
    result: std::result::Result<serde_json::Value, String>,
) -> std::result::Result<(WorkStatus, StatusUpdate), String> {
    let (status, update) = match result {
        Ok(output) => (
            WorkStatus::Done,
            StatusUpdate::transition(from, WorkStatus::Done).map(|u| u.with_output(output)),
        ),
        Err(message) => (
            WorkStatus::Failed,
            StatusUpdate::transition(from, WorkStatus::Failed).map(|u| u.with_error(&message)),
        ),
    };
    update.map(|u| (status, u)).map_err(|e| e.to_string())
}
