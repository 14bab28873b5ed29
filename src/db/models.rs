//! Database models matching the queue schema in `sql/schema.sql`

use crate::error::{Result, WorkerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Job kinds
// ============================================================================

/// Job type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Discover,
    RenderClip,
    AiShort,
    LongForm,
}

impl JobType {
    /// Kinds handled by render workers
    pub const RENDER_KINDS: [JobType; 3] = [JobType::AiShort, JobType::LongForm, JobType::RenderClip];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Discover => "discover",
            JobType::RenderClip => "render_clip",
            JobType::AiShort => "ai_short",
            JobType::LongForm => "long_form",
        }
    }

    pub fn is_render(&self) -> bool {
        !matches!(self, JobType::Discover)
    }
}

impl FromStr for JobType {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discover" => Ok(JobType::Discover),
            "render_clip" => Ok(JobType::RenderClip),
            "ai_short" => Ok(JobType::AiShort),
            "long_form" => Ok(JobType::LongForm),
            other => Err(WorkerError::UnknownJobType(other.to_string())),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status state machine
// ============================================================================

/// Work item status
///
/// `ready -> processing -> {done, failed}`. Tasks use `rendering` in place of
/// `processing`; both are "in flight" and behave identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Ready,
    Processing,
    Rendering,
    Done,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Ready => "ready",
            WorkStatus::Processing => "processing",
            WorkStatus::Rendering => "rendering",
            WorkStatus::Done => "done",
            WorkStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Done | WorkStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, WorkStatus::Processing | WorkStatus::Rendering)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Re-claiming an in-flight item after its lease expired keeps the status
    /// unchanged, so in-flight -> in-flight is not a transition at all and is
    /// rejected here.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        match self {
            WorkStatus::Ready => next.is_in_flight(),
            WorkStatus::Processing | WorkStatus::Rendering => next.is_terminal(),
            WorkStatus::Done | WorkStatus::Failed => false,
        }
    }
}

impl FromStr for WorkStatus {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(WorkStatus::Ready),
            "processing" => Ok(WorkStatus::Processing),
            "rendering" => Ok(WorkStatus::Rendering),
            "done" => Ok(WorkStatus::Done),
            "failed" => Ok(WorkStatus::Failed),
            other => Err(WorkerError::InvalidInput(format!("unknown status '{}'", other))),
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filtered status write.
///
/// Only built through [`StatusUpdate::transition`], so every update the
/// workers send has already passed the state machine check. The store applies
/// it only when the row still has `expected` status and is owned by `owner_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: WorkStatus,
    pub expected: WorkStatus,
    pub owner_id: Option<String>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn transition(from: WorkStatus, to: WorkStatus) -> Result<Self> {
        if !from.can_transition_to(to) {
            return Err(WorkerError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(Self {
            status: to,
            expected: from,
            owner_id: None,
            output: None,
            error: None,
        })
    }

    pub fn owned_by(mut self, worker_id: &str) -> Self {
        self.owner_id = Some(worker_id.to_string());
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Job - Matches jobs table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub job_type: String,
    pub status: String,
    pub parent_id: Option<Uuid>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn kind(&self) -> Result<JobType> {
        self.job_type.parse()
    }

    pub fn status(&self) -> Result<WorkStatus> {
        self.status.parse()
    }
}

/// NewRenderJob - A fan-out render job together with its first task
#[derive(Debug, Clone, Serialize)]
pub struct NewRenderJob {
    pub parent_id: Uuid,
    pub job_type: JobType,
    pub input: serde_json::Value,
}

impl NewRenderJob {
    /// Fan-out dedup key: one render job per source clip per parent
    pub fn source_url(&self) -> Option<&str> {
        self.input.get("source_url").and_then(|v| v.as_str())
    }
}

/// Result of a fan-out insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutInsert {
    /// A new render job and its ready task were created
    Created(Uuid),
    /// The parent already had a render job for this source; nothing was written
    Existing(Uuid),
}

impl FanOutInsert {
    pub fn job_id(&self) -> Uuid {
        match self {
            FanOutInsert::Created(id) | FanOutInsert::Existing(id) => *id,
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// RenderTask - Matches tasks table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RenderTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub owner_id: Option<String>,
    pub status: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderTask {
    /// The `job_type` discriminator carried in the task input
    pub fn job_type(&self) -> Option<&str> {
        self.input.get("job_type").and_then(|v| v.as_str())
    }

    pub fn status(&self) -> Result<WorkStatus> {
        self.status.parse()
    }
}

// ============================================================================
// Claimed items
// ============================================================================

/// Table + id of a work item, enough to address it in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    Job(Uuid),
    Task(Uuid),
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Job(id) => write!(f, "job {}", id),
            ItemRef::Task(id) => write!(f, "task {}", id),
        }
    }
}

/// An item a worker currently owns
#[derive(Debug, Clone)]
pub enum WorkItem {
    Job(Job),
    Task(RenderTask),
}

impl WorkItem {
    pub fn item_ref(&self) -> ItemRef {
        match self {
            WorkItem::Job(job) => ItemRef::Job(job.id),
            WorkItem::Task(task) => ItemRef::Task(task.id),
        }
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

/// Heartbeat - Matches worker_heartbeats table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: i64,
    pub worker_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Audit
// ============================================================================

/// A job whose terminal task outcome was never mirrored onto the job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LaggingParent {
    pub job_id: Uuid,
    pub job_status: String,
    pub task_id: Uuid,
    pub task_status: String,
}
