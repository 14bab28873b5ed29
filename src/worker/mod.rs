//! Worker module for claiming and processing queue items
//!
//! This module provides:
//! - TaskRunner: poll loop shared by both roles (claim, process, back off)
//! - TaskClaimer: atomic claim of the next eligible job or task
//! - Lifecycle: owner-side status transitions and parent propagation
//! - DiscoveryProcessor / RenderProcessor: the role-specific work
//! - HeartbeatReporter: liveness rows on an independent timer
//! - WorkerConfig: configuration for the worker

pub mod backoff;
pub mod claimer;
pub mod config;
pub mod discovery;
pub mod heartbeat;
pub mod lifecycle;
pub mod render;
pub mod strategy;
pub mod task_runner;

use crate::db::WorkItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use backoff::Backoff;
pub use claimer::{ClaimOutcome, TaskClaimer};
pub use config::{resolve_worker_id, WorkerConfig};
pub use discovery::{render_job_for, DiscoveryProcessor, FanOutReport};
pub use heartbeat::HeartbeatReporter;
pub use lifecycle::{FinishReport, Lifecycle, WriteOutcome};
pub use render::RenderProcessor;
pub use strategy::{RenderStrategy, StrategyRegistry};
pub use task_runner::{setup_signal_handler, PollOutcome, TaskRunner};

/// Which queue a worker process drains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Claims `discover` jobs and fans out render jobs
    Discovery,
    /// Claims render tasks through the stored claim procedure
    Render,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Discovery => "discovery",
            WorkerRole::Render => "render",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific processing of a claimed item
///
/// Implementations never fail past their own boundary: every outcome ends up
/// as a status transition written through [`Lifecycle`].
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    fn role(&self) -> WorkerRole;

    async fn process(&self, item: &WorkItem);
}
