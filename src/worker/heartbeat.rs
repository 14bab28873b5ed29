//! Heartbeat reporter - liveness rows on an independent timer

use crate::db::WorkStore;
use crate::error::Result;
use crate::worker::WorkerRole;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Writes one heartbeat row per interval for a worker
///
/// Runs on its own task so a long render never delays a beat. A failed
/// insert is logged and the next tick tries again.
pub struct HeartbeatReporter {
    store: Arc<dyn WorkStore>,
    worker_id: String,
    role: WorkerRole,
    interval: Duration,
}

impl HeartbeatReporter {
    pub fn new(store: Arc<dyn WorkStore>, worker_id: &str, role: WorkerRole, interval: Duration) -> Self {
        Self {
            store,
            worker_id: worker_id.to_string(),
            role,
            interval,
        }
    }

    /// Write a single heartbeat row
    pub async fn beat(&self, seq: u64) -> Result<()> {
        let message = format!("{} worker alive (beat #{})", self.role, seq);
        self.store.insert_heartbeat(&self.worker_id, &message).await?;
        debug!("[{}] {}", self.worker_id, message);
        Ok(())
    }

    /// Beat forever; the first beat is immediate
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut seq: u64 = 0;
        loop {
            ticker.tick().await;
            seq += 1;
            if let Err(e) = self.beat(seq).await {
                warn!("[{}] Heartbeat #{} failed: {}", self.worker_id, seq, e);
            }
        }
    }

    /// Run on a background task; abort the handle to stop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
