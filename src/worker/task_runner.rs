//! Task runner - main worker loop

use crate::db::{WorkItem, WorkStore};
use crate::error::{Result, WorkerError};
use crate::worker::{Backoff, ClaimOutcome, Lifecycle, TaskClaimer, WorkProcessor, WorkerConfig};
use std::sync::Arc;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single poll did
#[derive(Debug)]
pub enum PollOutcome {
    /// An item was claimed and processed to a terminal write
    Processed,
    /// An item was claimed but ran past the task timeout and was failed
    TimedOut,
    /// Nothing eligible to claim
    Idle,
    /// The claim itself failed
    StoreError(WorkerError),
}

/// Task runner that claims and processes items for one worker role
pub struct TaskRunner {
    store: Arc<dyn WorkStore>,
    claimer: TaskClaimer,
    lifecycle: Lifecycle,
    processor: Arc<dyn WorkProcessor>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl TaskRunner {
    /// Create a new task runner
    pub fn new(
        store: Arc<dyn WorkStore>,
        processor: Arc<dyn WorkProcessor>,
        config: WorkerConfig,
        worker_id: &str,
    ) -> Self {
        let claimer = TaskClaimer::new(
            store.clone(),
            worker_id,
            processor.role(),
            config.lease_duration,
        );
        let lifecycle = Lifecycle::new(store.clone(), worker_id);

        Self {
            store,
            claimer,
            lifecycle,
            processor,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn worker_id(&self) -> &str {
        self.claimer.worker_id()
    }

    /// Main worker loop
    ///
    /// Claims and processes items until shutdown is signaled. An idle poll
    /// waits the fixed poll interval; a failed claim waits an exponentially
    /// growing delay that resets once the store answers again.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting {} worker {}...",
            self.processor.role(),
            self.worker_id()
        );
        info!("Poll interval: {:?}", self.config.poll_interval);
        info!("Lease: {:?}", self.config.lease_duration);
        info!("Task timeout: {:?}", self.config.task_timeout);

        let mut backoff = Backoff::new(self.config.error_backoff_base, self.config.error_backoff_max);

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown signal received, stopping worker...");
                break;
            }

            match self.poll_once().await {
                PollOutcome::Processed | PollOutcome::TimedOut => {
                    backoff.reset();
                    debug!("Item finished, checking for next item...");
                }
                PollOutcome::Idle => {
                    backoff.reset();
                    debug!("Nothing to claim, sleeping for {:?}", self.config.poll_interval);
                    self.pause(self.config.poll_interval).await;
                }
                PollOutcome::StoreError(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        "Worker error: {} (failure #{}, retrying in {:?})",
                        e,
                        backoff.failures(),
                        delay
                    );
                    self.pause(delay).await;
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Claim at most one item and process it
    pub async fn poll_once(&self) -> PollOutcome {
        match self.claimer.claim().await {
            ClaimOutcome::Claimed(item) => {
                if self.process_claimed(&item).await {
                    PollOutcome::Processed
                } else {
                    PollOutcome::TimedOut
                }
            }
            ClaimOutcome::Empty => PollOutcome::Idle,
            ClaimOutcome::StoreError(e) => PollOutcome::StoreError(e),
        }
    }

    /// Process a claimed item under the task timeout, renewing its lease
    /// while it runs. Returns false when the item timed out.
    async fn process_claimed(&self, item: &WorkItem) -> bool {
        let renewal = self.config.lease_renewal_interval();
        let mut renew = interval_at(Instant::now() + renewal, renewal);
        let deadline = sleep(self.config.task_timeout);
        let work = self.processor.process(item);
        tokio::pin!(deadline);
        tokio::pin!(work);

        loop {
            tokio::select! {
                _ = &mut work => return true,
                _ = &mut deadline => {
                    error!(
                        "[{}] {} timed out after {:?}",
                        self.worker_id(),
                        item.item_ref(),
                        self.config.task_timeout
                    );
                    self.lifecycle
                        .abandon(item, &WorkerError::TaskTimeout.to_string())
                        .await;
                    return false;
                }
                _ = renew.tick() => self.renew_lease(item).await,
            }
        }
    }

    async fn renew_lease(&self, item: &WorkItem) {
        match self
            .store
            .extend_lease(item.item_ref(), self.worker_id(), self.config.lease_duration)
            .await
        {
            Ok(true) => debug!("[{}] Renewed lease on {}", self.worker_id(), item.item_ref()),
            Ok(false) => warn!(
                "[{}] Lost ownership of {}; its final write will be skipped",
                self.worker_id(),
                item.item_ref()
            ),
            Err(e) => warn!(
                "[{}] Failed to renew lease on {}: {}",
                self.worker_id(),
                item.item_ref(),
                e
            ),
        }
    }

    /// Sleep, waking early when shutdown is signaled
    async fn pause(&self, duration: std::time::Duration) {
        let deadline = Instant::now() + duration;
        let step = std::time::Duration::from_millis(100);
        while Instant::now() < deadline {
            if self.shutdown.is_cancelled() {
                return;
            }
            sleep(step.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// Run once and exit (for testing)
    ///
    /// Returns:
    /// - Ok(true) if an item was processed
    /// - Ok(false) if nothing was available
    /// - Err on a claim failure or a timed out item
    pub async fn run_once(&self) -> Result<bool> {
        info!("Running worker in single-item mode...");
        match self.poll_once().await {
            PollOutcome::Processed => Ok(true),
            PollOutcome::Idle => Ok(false),
            PollOutcome::TimedOut => Err(WorkerError::TaskTimeout),
            PollOutcome::StoreError(e) => Err(e),
        }
    }
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, finishing the current item before shutdown...");
                shutdown.cancel();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}
