//! Task claimer - one atomic ownership grab per call

use crate::db::{JobType, WorkItem, WorkStore};
use crate::error::WorkerError;
use crate::worker::WorkerRole;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a claim attempt
///
/// A store failure is reported separately from an empty queue so it can be
/// logged and backed off differently, even though the loop treats both as
/// "nothing to do right now".
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(WorkItem),
    Empty,
    StoreError(WorkerError),
}

/// Claims work for a single worker identity and role
pub struct TaskClaimer {
    store: Arc<dyn WorkStore>,
    worker_id: String,
    role: WorkerRole,
    lease: Duration,
}

impl TaskClaimer {
    pub fn new(store: Arc<dyn WorkStore>, worker_id: &str, role: WorkerRole, lease: Duration) -> Self {
        Self {
            store,
            worker_id: worker_id.to_string(),
            role,
            lease,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Take ownership of the next eligible item, if any
    pub async fn claim(&self) -> ClaimOutcome {
        debug!("[{}] Claim attempt ({})", self.worker_id, self.role);

        let result = match self.role {
            WorkerRole::Discovery => self
                .store
                .claim_next_job(JobType::Discover, &self.worker_id, self.lease)
                .await
                .map(|job| job.map(WorkItem::Job)),
            WorkerRole::Render => self
                .store
                .claim_next_task(&self.worker_id, self.lease)
                .await
                .map(|task| task.map(WorkItem::Task)),
        };

        match result {
            Ok(Some(item)) => {
                let attempts = match &item {
                    WorkItem::Job(job) => job.attempts,
                    WorkItem::Task(task) => task.attempts,
                };
                if attempts > 1 {
                    warn!(
                        "[{}] Reclaimed {} after an expired lease (attempt {})",
                        self.worker_id,
                        item.item_ref(),
                        attempts
                    );
                } else {
                    info!("[{}] Claimed {}", self.worker_id, item.item_ref());
                }
                ClaimOutcome::Claimed(item)
            }
            Ok(None) => ClaimOutcome::Empty,
            Err(e) => {
                warn!("[{}] Claim failed: {}", self.worker_id, e);
                ClaimOutcome::StoreError(e)
            }
        }
    }
}
