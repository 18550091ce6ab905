//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for share orchestration runs and workers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts at acquiring a run's locks before giving up.
    pub lock_max_retries: u32,

    /// Wait between lock acquisition attempts (seconds).
    pub lock_retry_interval_secs: u64,

    /// Lease on lock rows, renewed by the running holder every third of it;
    /// expired rows are taken over (seconds).
    pub lock_lease_secs: u64,

    /// Extra acceptance rounds when a resource-share invitation is still pending.
    pub invitation_acceptance_retries: u32,

    /// Wait between invitation acceptance rounds (milliseconds).
    pub invitation_retry_wait_millis: u64,

    /// Polls of a new access point before giving up.
    pub access_point_creation_retries: u32,

    /// Wait between access point polls (seconds).
    pub access_point_poll_interval_secs: u64,

    /// Capacity of the worker task channel.
    pub worker_queue_capacity: usize,

    /// Runs executed concurrently by one worker.
    pub worker_max_concurrent_runs: usize,

    /// Prefix of generated remote names.
    pub resource_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_max_retries: 10,
            lock_retry_interval_secs: 60,
            lock_lease_secs: 3600,
            invitation_acceptance_retries: 1,
            invitation_retry_wait_millis: 2000,
            access_point_creation_retries: 5,
            access_point_poll_interval_secs: 30,
            worker_queue_capacity: 256,
            worker_max_concurrent_runs: 8,
            resource_prefix: "shareflow".to_string(),
        }
    }
}

const ENV_PREFIX: &str = "SHAREFLOW_";

// Ten years.
const MAX_LEASE_SECS: u64 = 315_360_000;

// Leaves a renewal period of at least one second.
const MIN_LEASE_SECS: u64 = 3;

impl EngineConfig {
    /// Loads the JSON file (if any), then applies `SHAREFLOW_*` environment overrides.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    /// Applies overrides from a key lookup, e.g. `SHAREFLOW_LOCK_MAX_RETRIES`.
    pub fn with_env_overrides<F>(mut self, get_env: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_num(&get_env, "LOCK_MAX_RETRIES", &mut self.lock_max_retries)?;
        override_num(&get_env, "LOCK_RETRY_INTERVAL_SECS", &mut self.lock_retry_interval_secs)?;
        override_num(&get_env, "LOCK_LEASE_SECS", &mut self.lock_lease_secs)?;
        override_num(&get_env, "INVITATION_ACCEPTANCE_RETRIES", &mut self.invitation_acceptance_retries)?;
        override_num(&get_env, "INVITATION_RETRY_WAIT_MILLIS", &mut self.invitation_retry_wait_millis)?;
        override_num(&get_env, "ACCESS_POINT_CREATION_RETRIES", &mut self.access_point_creation_retries)?;
        override_num(&get_env, "ACCESS_POINT_POLL_INTERVAL_SECS", &mut self.access_point_poll_interval_secs)?;
        override_num(&get_env, "WORKER_QUEUE_CAPACITY", &mut self.worker_queue_capacity)?;
        override_num(&get_env, "WORKER_MAX_CONCURRENT_RUNS", &mut self.worker_max_concurrent_runs)?;
        if let Some(prefix) = get_env(&format!("{ENV_PREFIX}RESOURCE_PREFIX")) {
            self.resource_prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.worker_queue_capacity == 0 || self.worker_max_concurrent_runs == 0 {
            return Err(EngineError::Config("worker capacity and concurrency must be positive".into()));
        }
        if self.lock_lease_secs < MIN_LEASE_SECS {
            return Err(EngineError::Config(format!(
                "lock_lease_secs must be at least {MIN_LEASE_SECS}, got {}",
                self.lock_lease_secs
            )));
        }
        if self.resource_prefix.is_empty() {
            return Err(EngineError::Config("resource_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn lock_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.lock_max_retries, Duration::from_secs(self.lock_retry_interval_secs))
    }

    pub fn lock_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lock_lease_secs.min(MAX_LEASE_SECS)).unwrap_or_default())
    }

    /// First acceptance round plus the configured retries.
    pub fn invitation_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.invitation_acceptance_retries.saturating_add(1),
            Duration::from_millis(self.invitation_retry_wait_millis),
        )
    }

    pub fn access_point_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.access_point_creation_retries,
            Duration::from_secs(self.access_point_poll_interval_secs),
        )
    }
}

fn override_num<F, T>(get_env: &F, name: &str, target: &mut T) -> EngineResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Some(raw) = get_env(&key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))?;
    }
    Ok(())
}
