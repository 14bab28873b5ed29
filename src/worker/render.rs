//! Render processor - dispatches a claimed task to its strategy

use crate::db::{RenderTask, WorkItem};
use crate::error::{Result, WorkerError};
use crate::worker::{FinishReport, Lifecycle, StrategyRegistry, WorkProcessor, WorkerRole};
use async_trait::async_trait;
use tracing::{error, info};

/// Processes claimed render tasks
pub struct RenderProcessor {
    lifecycle: Lifecycle,
    registry: StrategyRegistry,
}

impl RenderProcessor {
    pub fn new(lifecycle: Lifecycle, registry: StrategyRegistry) -> Self {
        Self {
            lifecycle,
            registry,
        }
    }

    /// Run one task and write its status plus its parent job's
    pub async fn process_task(&self, task: &RenderTask) -> FinishReport {
        let result = self.run_strategy(task).await.map_err(|e| e.to_string());
        self.lifecycle.finish_task(task, result).await
    }

    async fn run_strategy(&self, task: &RenderTask) -> Result<serde_json::Value> {
        let job_type = task.job_type().ok_or_else(|| {
            WorkerError::InvalidInput(format!("task {} has no job_type in its input", task.id))
        })?;

        let strategy = self.registry.get(job_type)?;
        info!(
            "[{}] Rendering task {} ({}) for job {}",
            self.lifecycle.worker_id(),
            task.id,
            job_type,
            task.job_id
        );
        strategy.run(&task.input).await
    }
}

#[async_trait]
impl WorkProcessor for RenderProcessor {
    fn role(&self) -> WorkerRole {
        WorkerRole::Render
    }

    async fn process(&self, item: &WorkItem) {
        match item {
            WorkItem::Task(task) => {
                self.process_task(task).await;
            }
            WorkItem::Job(job) => {
                error!("Render worker was handed job {} instead of a task; skipping", job.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{JobType, MemoryStore, WorkStatus, WorkStore};
    use crate::media::SimulatedMedia;
    use crate::worker::WriteOutcome;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(60);

    fn processor(store: Arc<MemoryStore>, worker_id: &str) -> RenderProcessor {
        let media = Arc::new(SimulatedMedia::with_latency(Duration::ZERO));
        RenderProcessor::new(
            Lifecycle::new(store, worker_id),
            StrategyRegistry::with_media(media).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_missing_job_type_fails_task() {
        let store = Arc::new(MemoryStore::new());
        let job_id = store.insert_job(JobType::RenderClip, None, json!({})).await;
        let task_id = store.insert_task(job_id, json!({ "title": "no kind" })).await;
        let task = store.claim_next_task("r1", LEASE).await.unwrap().unwrap();

        let report = processor(store.clone(), "r1").process_task(&task).await;
        assert_eq!(report.status, WorkStatus::Failed);
        assert_eq!(report.parent, Some(WriteOutcome::Applied));

        let task = store.task(task_id).await.unwrap();
        assert!(task.error.unwrap().contains("no job_type"));
    }

    #[tokio::test]
    async fn test_ai_short_renders() {
        let store = Arc::new(MemoryStore::new());
        let input = json!({
            "job_type": "ai_short",
            "prompt": "three facts about octopuses",
            "duration_seconds": 30
        });
        let job_id = store.insert_job(JobType::AiShort, None, input.clone()).await;
        store.insert_task(job_id, input).await;
        let task = store.claim_next_task("r1", LEASE).await.unwrap().unwrap();

        let report = processor(store.clone(), "r1").process_task(&task).await;
        assert_eq!(report.status, WorkStatus::Done);
        assert!(report.is_consistent());

        let job = store.job(job_id).await.unwrap();
        let output = job.output.unwrap();
        assert!(output["video_url"].as_str().unwrap().ends_with(".mp4"));
    }
}
