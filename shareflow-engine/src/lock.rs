//! Resource locks held for the duration of an orchestration run.
//!
//! A run locks its whole resource set at once (the dataset and the principal
//! scope). Acquisition is all-or-nothing and retried with a fixed backoff.
//! The returned [`HeldLocks`] guard renews the lease every third of it while
//! alive and releases every key when dropped.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::retry::{Attempt, RetryError, RetryPolicy};
use shareflow_storage::ShareStore;
use shareflow_types::{LockKey, LockOwner, ResourceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

const MIN_RENEW_PERIOD: Duration = Duration::from_secs(1);

/// Acquires and releases lock rows in the share store.
#[derive(Clone)]
pub struct ResourceLockManager {
    store: ShareStore,
    policy: RetryPolicy,
    lease: chrono::Duration,
}

impl ResourceLockManager {
    pub fn new(store: ShareStore, policy: RetryPolicy, lease: chrono::Duration) -> Self {
        Self { store, policy, lease }
    }

    pub fn from_config(store: ShareStore, config: &EngineConfig) -> Self {
        Self::new(store, config.lock_retry_policy(), config.lock_lease())
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Single all-or-nothing attempt.
    pub fn acquire_locks(&self, keys: &[LockKey], owner: &LockOwner) -> EngineResult<bool> {
        Ok(self.store.acquire_locks(keys, owner, self.lease)?)
    }

    pub fn release_lock(&self, key: &LockKey, owner: &LockOwner) -> EngineResult<bool> {
        Ok(self.store.release_lock(key, owner)?)
    }

    pub fn lease(&self) -> chrono::Duration {
        self.lease
    }

    pub fn get_lock(&self, key: &LockKey) -> EngineResult<Option<ResourceLock>> {
        Ok(self.store.get_lock(key)?)
    }

    pub fn is_locked(&self, key: &LockKey) -> EngineResult<bool> {
        Ok(self.store.is_locked(key)?)
    }

    /// Acquires `keys` for `owner`, retrying the whole set until the policy is exhausted.
    ///
    /// Fails with [`EngineError::ResourceLockTimeout`] when every attempt found a conflict.
    pub async fn acquire_lock_with_retry(
        &self,
        keys: Vec<LockKey>,
        owner: LockOwner,
        action: &str,
    ) -> EngineResult<HeldLocks> {
        let acquired = self
            .policy
            .retry(|attempt| {
                let outcome = match self.store.acquire_locks(&keys, &owner, self.lease) {
                    Ok(true) => Attempt::Done(()),
                    Ok(false) => Attempt::Retry(format!("locks busy for {}", owner.acquired_by_uri)),
                    Err(e) => Attempt::Fail(EngineError::from(e)),
                };
                if matches!(outcome, Attempt::Retry(_)) {
                    info!(
                        "{action}: lock attempt {attempt}/{} for {} found a conflict",
                        self.policy.max_attempts, owner.acquired_by_uri
                    );
                }
                std::future::ready(outcome)
            })
            .await;

        match acquired {
            Ok(()) => {
                debug!("{} (run {}) holds {} locks", owner.acquired_by_uri, owner.run_id, keys.len());
                let renewer = self.spawn_renewer(keys.clone(), owner.clone());
                Ok(HeldLocks {
                    store: self.store.clone(),
                    keys,
                    owner,
                    released: false,
                    renewer,
                })
            }
            Err(RetryError::Failed(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, .. }) => {
                error!("{action}: gave up on locks for {} after {attempts} attempts", owner.acquired_by_uri);
                Err(EngineError::ResourceLockTimeout {
                    action: action.to_string(),
                    resources: describe(&keys),
                })
            }
        }
    }

    fn spawn_renewer(&self, keys: Vec<LockKey>, owner: LockOwner) -> Option<JoinHandle<()>> {
        let period = (self.lease / 3).to_std().ok()?.max(MIN_RENEW_PERIOD);
        let store = self.store.clone();
        let lease = self.lease;
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match store.renew_locks(&keys, &owner, lease) {
                    Ok(true) => debug!("run {} renewed {} locks", owner.run_id, keys.len()),
                    Ok(false) => {
                        error!(
                            "run {} for {} lost its locks before finishing",
                            owner.run_id, owner.acquired_by_uri
                        );
                        return;
                    }
                    Err(e) => warn!("run {}: renewing locks failed: {e}", owner.run_id),
                }
            }
        }))
    }
}

fn describe(keys: &[LockKey]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Guard over a run's locks. Releases every key on drop unless released explicitly.
pub struct HeldLocks {
    store: ShareStore,
    keys: Vec<LockKey>,
    owner: LockOwner,
    released: bool,
    renewer: Option<JoinHandle<()>>,
}

impl HeldLocks {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Whether every key is still held by this run.
    pub fn is_held(&self) -> EngineResult<bool> {
        for key in &self.keys {
            let held = self
                .store
                .get_lock(key)?
                .is_some_and(|lock| lock.owner.run_id == self.owner.run_id);
            if !held {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Releases every key, attempting all of them even if one fails.
    pub fn release(mut self) -> EngineResult<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> EngineResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Some(renewer) = self.renewer.take() {
            renewer.abort();
        }
        let mut first_error = None;
        for key in &self.keys {
            match self.store.release_lock(key, &self.owner) {
                Ok(true) => {}
                Ok(false) => error!(
                    "failed to release lock on {key} for {}: not held",
                    self.owner.acquired_by_uri
                ),
                Err(e) => {
                    error!("failed to release lock on {key} for {}: {e}", self.owner.acquired_by_uri);
                    first_error.get_or_insert(EngineError::from(e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.do_release() {
                error!("releasing locks on drop for {}: {e}", self.owner.acquired_by_uri);
            }
        }
    }
}
