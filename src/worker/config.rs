//! Worker configuration

use crate::error::{Result, WorkerError};
use crate::worker::WorkerRole;
use std::time::Duration;
use uuid::Uuid;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval when no work is available
    pub poll_interval: Duration,

    /// Interval between heartbeat rows
    pub heartbeat_interval: Duration,

    /// How long a claim stays exclusive without renewal
    pub lease_duration: Duration,

    /// Upper bound on processing a single item
    pub task_timeout: Duration,

    /// First delay after a store error
    pub error_backoff_base: Duration,

    /// Cap for the store error backoff
    pub error_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            lease_duration: Duration::from_secs(600), // 10 minutes
            task_timeout: Duration::from_secs(300),   // 5 minutes
            error_backoff_base: Duration::from_secs(5),
            error_backoff_max: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// How often an in-flight lease is renewed
    pub fn lease_renewal_interval(&self) -> Duration {
        (self.lease_duration / 3).max(Duration::from_millis(10))
    }

    /// Reject settings the claim protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("poll interval", self.poll_interval),
            ("heartbeat interval", self.heartbeat_interval),
            ("lease duration", self.lease_duration),
            ("task timeout", self.task_timeout),
            ("error backoff", self.error_backoff_base),
        ];
        for (name, value) in named {
            if value.is_zero() {
                return Err(WorkerError::ConfigError(format!("{} must be greater than zero", name)));
            }
        }

        if self.error_backoff_max < self.error_backoff_base {
            return Err(WorkerError::ConfigError(
                "error backoff cap is smaller than its base delay".to_string(),
            ));
        }

        // A lease that can lapse between two renewals lets a second worker
        // reclaim an item that is still being processed.
        if self.lease_duration < self.lease_renewal_interval() * 2 {
            return Err(WorkerError::ConfigError(format!(
                "lease duration {:?} is too short to be renewed",
                self.lease_duration
            )));
        }

        Ok(())
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Set poll interval
    pub fn poll_interval(mut self, duration: Duration) -> Self {
        self.config.poll_interval = duration;
        self
    }

    /// Set poll interval in seconds
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval = Duration::from_secs(secs);
        self
    }

    /// Set heartbeat interval
    pub fn heartbeat_interval(mut self, duration: Duration) -> Self {
        self.config.heartbeat_interval = duration;
        self
    }

    /// Set lease duration
    pub fn lease_duration(mut self, duration: Duration) -> Self {
        self.config.lease_duration = duration;
        self
    }

    /// Set task timeout
    pub fn task_timeout(mut self, duration: Duration) -> Self {
        self.config.task_timeout = duration;
        self
    }

    /// Set the store error backoff range
    pub fn error_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.error_backoff_base = base;
        self.config.error_backoff_max = max;
        self
    }

    /// Build and validate the config
    pub fn build(self) -> Result<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Worker identity: `WORKER_ID` when set, otherwise `<role>-<random suffix>`
pub fn resolve_worker_id(role: WorkerRole, explicit: Option<String>) -> Result<String> {
    let id = match explicit.or_else(|| std::env::var("WORKER_ID").ok()) {
        Some(id) => id.trim().to_string(),
        None => {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{}-{}", role, &suffix[..12])
        }
    };

    if id.is_empty() {
        return Err(WorkerError::ConfigError("WORKER_ID is empty".to_string()));
    }
    Ok(id)
}
