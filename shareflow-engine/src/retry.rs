//! Bounded retry with fixed backoff.
//!
//! Used wherever the engine waits on another party: lock acquisition,
//! access point creation and resource-share invitation acceptance.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// What one attempt of a retried operation reported.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Not ready yet; try again after the interval.
    Retry(String),
    /// Permanent failure; stop retrying.
    Fail(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_reason}")]
    Exhausted { attempts: u32, last_reason: String },

    #[error("{0}")]
    Failed(E),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs `op` until it reports `Done` or `Fail`, sleeping `interval` between attempts.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let attempts = self.attempts();
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(e) => return Err(RetryError::Failed(e)),
                Attempt::Retry(reason) => {
                    debug!("attempt {attempt}/{attempts} not ready: {reason}");
                    last_reason = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(RetryError::Exhausted { attempts, last_reason })
    }

    /// Blocking variant of [`RetryPolicy::retry`] for worker threads.
    pub fn retry_blocking<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Attempt<T, E>,
    {
        let attempts = self.attempts();
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match op(attempt) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(e) => return Err(RetryError::Failed(e)),
                Attempt::Retry(reason) => {
                    debug!("attempt {attempt}/{attempts} not ready: {reason}");
                    last_reason = reason;
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.interval);
            }
        }
        Err(RetryError::Exhausted { attempts, last_reason })
    }
}

pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    policy.retry(op).await
}

pub fn retry_with_backoff_blocking<T, E, F>(policy: RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    policy.retry_blocking(op)
}
