//! Discovery processor - turns a discover job into render jobs

use crate::db::{FanOutInsert, Job, JobType, NewRenderJob, WorkItem, WorkStore};
use crate::error::Result;
use crate::search::{CandidateClip, ClipSearch, DiscoveryRequest};
use crate::worker::{Lifecycle, WorkProcessor, WorkerRole, WriteOutcome};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one fan-out pass, stored as the discovery job's output
///
/// `inserted` lists every render job the parent has for this pass's
/// candidates, including those an earlier owner already created
/// (`already_present` of them).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FanOutReport {
    pub candidates: usize,
    pub inserted: Vec<Uuid>,
    pub already_present: usize,
    pub failed_inserts: usize,
}

/// Processes claimed `discover` jobs
pub struct DiscoveryProcessor {
    store: Arc<dyn WorkStore>,
    lifecycle: Lifecycle,
    search: Arc<dyn ClipSearch>,
}

impl DiscoveryProcessor {
    pub fn new(store: Arc<dyn WorkStore>, lifecycle: Lifecycle, search: Arc<dyn ClipSearch>) -> Self {
        Self {
            store,
            lifecycle,
            search,
        }
    }

    /// Run discovery for one job and write its terminal status
    ///
    /// The job ends `failed` only when discovery itself errors. Individual
    /// insert failures are counted in the output and the job still ends `done`.
    pub async fn process_job(&self, job: &Job) -> WriteOutcome {
        info!("Discovering clips for job {}", job.id);

        match self.discover_and_fan_out(job).await {
            Ok(report) => {
                info!(
                    "Job {}: {} candidates, {} render jobs ({} already present), {} inserts failed",
                    job.id,
                    report.candidates,
                    report.inserted.len(),
                    report.already_present,
                    report.failed_inserts
                );
                let output = serde_json::to_value(&report)
                    .unwrap_or_else(|_| json!({ "candidates": report.candidates }));
                self.lifecycle.finish_job(job, Ok(output)).await
            }
            Err(e) => {
                error!("Discovery for job {} failed: {}", job.id, e);
                self.lifecycle.finish_job(job, Err(e.to_string())).await
            }
        }
    }

    async fn discover_and_fan_out(&self, job: &Job) -> Result<FanOutReport> {
        let request = DiscoveryRequest::from_input(&job.input)?;
        let candidates = self
            .search
            .search(
                request.platform,
                request.query.as_deref(),
                request.category.as_deref(),
            )
            .await?;

        let mut report = FanOutReport {
            candidates: candidates.len(),
            ..FanOutReport::default()
        };

        // Best effort: one bad insert must not stop the rest
        for (index, candidate) in candidates.iter().enumerate() {
            match self.insert_candidate(job.id, candidate).await {
                Ok(FanOutInsert::Created(child_id)) => report.inserted.push(child_id),
                Ok(FanOutInsert::Existing(child_id)) => {
                    debug!(
                        "Job {}: render job {} for {} already exists",
                        job.id, child_id, candidate.source_url
                    );
                    report.inserted.push(child_id);
                    report.already_present += 1;
                }
                Err(e) => {
                    warn!(
                        "Job {}: failed to insert candidate #{} ({}): {}",
                        job.id,
                        index + 1,
                        candidate.source_url,
                        e
                    );
                    report.failed_inserts += 1;
                }
            }
        }

        Ok(report)
    }

    async fn insert_candidate(
        &self,
        parent_id: Uuid,
        candidate: &CandidateClip,
    ) -> Result<FanOutInsert> {
        candidate.validate()?;
        let new_job = render_job_for(parent_id, candidate);
        self.store.insert_render_job(&new_job).await
    }
}

/// The `render_clip` job a candidate turns into
pub fn render_job_for(parent_id: Uuid, candidate: &CandidateClip) -> NewRenderJob {
    NewRenderJob {
        parent_id,
        job_type: JobType::RenderClip,
        input: json!({
            "job_type": JobType::RenderClip.as_str(),
            "title": candidate.title,
            "source_url": candidate.source_url,
            "platform": candidate.platform,
            "viral_score": candidate.viral_score,
            "duration_seconds": candidate.duration_seconds,
            "thumbnail_url": candidate.thumbnail_url,
            "discovery_job_id": parent_id,
        }),
    }
}

#[async_trait]
impl WorkProcessor for DiscoveryProcessor {
    fn role(&self) -> WorkerRole {
        WorkerRole::Discovery
    }

    async fn process(&self, item: &WorkItem) {
        match item {
            WorkItem::Job(job) => {
                self.process_job(job).await;
            }
            WorkItem::Task(task) => {
                error!("Discovery worker was handed render task {}; skipping", task.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Platform;

    #[test]
    fn test_render_job_carries_candidate() {
        let parent = Uuid::new_v4();
        let candidate = CandidateClip {
            title: "Ace round".to_string(),
            source_url: "https://clips.twitch.tv/AceRound".to_string(),
            platform: Platform::Twitch,
            viral_score: 93,
            duration_seconds: Some(42),
            thumbnail_url: None,
        };

        let job = render_job_for(parent, &candidate);
        assert_eq!(job.parent_id, parent);
        assert_eq!(job.job_type, JobType::RenderClip);
        assert_eq!(job.input["job_type"], "render_clip");
        assert_eq!(job.input["platform"], "twitch");
        assert_eq!(job.input["viral_score"], 93);
        assert_eq!(job.input["discovery_job_id"], parent.to_string());
    }
}
