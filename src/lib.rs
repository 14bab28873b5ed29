//! Clip Worker - discovery and render workers over a shared job queue
//!
//! Jobs and render tasks live in Postgres. Any number of worker processes
//! poll the queue, take exclusive ownership of one item at a time through an
//! atomic claim, process it, and write the terminal status back.
//!
//! Two roles share the same loop:
//! - discovery workers claim `discover` jobs and fan each one out into
//!   `render_clip` jobs (one per candidate clip)
//! - render workers claim render tasks, dispatch on the task's `job_type`
//!   and mirror the result onto the parent job
//!
//! Ownership is leased: a worker that dies mid-item stops renewing its lease
//! and the item becomes claimable again once the lease lapses.

pub mod db;
pub mod error;
pub mod media;
pub mod search;
pub mod worker;

pub use error::{Result, WorkerError};

use crate::db::WorkStore;
use crate::media::SimulatedMedia;
use crate::search::SimulatedSearch;
use crate::worker::{
    DiscoveryProcessor, Lifecycle, RenderProcessor, StrategyRegistry, TaskRunner, WorkProcessor,
    WorkerConfig, WorkerRole,
};
use std::sync::Arc;

/// Build the processor for a role with the bundled collaborators
pub fn build_processor(
    role: WorkerRole,
    store: Arc<dyn WorkStore>,
    worker_id: &str,
) -> Result<Arc<dyn WorkProcessor>> {
    let lifecycle = Lifecycle::new(store.clone(), worker_id);

    let processor: Arc<dyn WorkProcessor> = match role {
        WorkerRole::Discovery => Arc::new(DiscoveryProcessor::new(
            store,
            lifecycle,
            Arc::new(SimulatedSearch::default()),
        )),
        WorkerRole::Render => {
            let registry = StrategyRegistry::with_media(Arc::new(SimulatedMedia::default()))?;
            Arc::new(RenderProcessor::new(lifecycle, registry))
        }
    };
    Ok(processor)
}

/// Build a ready-to-run worker for a role
///
/// # Example
/// ```ignore
/// use clip_worker::db::{create_pool_from_env, PgStore};
/// use clip_worker::worker::{WorkerConfig, WorkerRole};
/// use std::sync::Arc;
///
/// let pool = create_pool_from_env().await?;
/// let store = Arc::new(PgStore::new(pool));
/// let runner = clip_worker::build_runner(WorkerRole::Render, store, WorkerConfig::default(), "render-1")?;
/// runner.run().await?;
/// ```
pub fn build_runner(
    role: WorkerRole,
    store: Arc<dyn WorkStore>,
    config: WorkerConfig,
    worker_id: &str,
) -> Result<TaskRunner> {
    config.validate()?;
    let processor = build_processor(role, store.clone(), worker_id)?;
    Ok(TaskRunner::new(store, processor, config, worker_id))
}
