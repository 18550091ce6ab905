//! Tests for bounded retry.

use pretty_assertions::assert_eq;
use shareflow_engine::{retry_with_backoff, retry_with_backoff_blocking, Attempt, RetryError, RetryPolicy};
use std::cell::Cell;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn retries_until_done() {
    let policy = RetryPolicy::new(5, Duration::from_secs(30));
    let started = tokio::time::Instant::now();
    let result: Result<u32, RetryError<String>> = retry_with_backoff(policy, |attempt| async move {
        if attempt < 3 {
            Attempt::Retry(format!("not yet ({attempt})"))
        } else {
            Attempt::Done(attempt)
        }
    })
    .await;

    assert_eq!(result, Ok(3));
    // Two sleeps between three attempts.
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn exhausted_reports_last_reason() {
    let policy = RetryPolicy::new(3, Duration::from_secs(1));
    let result: Result<(), RetryError<String>> =
        retry_with_backoff(policy, |attempt| async move { Attempt::Retry(format!("busy {attempt}")) }).await;

    assert_eq!(
        result,
        Err(RetryError::Exhausted {
            attempts: 3,
            last_reason: "busy 3".into()
        })
    );
}

#[tokio::test]
async fn permanent_failure_stops_immediately() {
    let calls = Cell::new(0);
    let policy = RetryPolicy::new(10, Duration::ZERO);
    let result: Result<(), RetryError<&str>> = policy
        .retry(|_| {
            calls.set(calls.get() + 1);
            async { Attempt::Fail("denied") }
        })
        .await;

    assert_eq!(result, Err(RetryError::Failed("denied")));
    assert_eq!(calls.get(), 1);
}

#[test]
fn zero_attempts_still_tries_once() {
    let calls = Cell::new(0);
    let result: Result<(), RetryError<String>> = retry_with_backoff_blocking(RetryPolicy::new(0, Duration::ZERO), |_| {
        calls.set(calls.get() + 1);
        Attempt::Retry("busy".into())
    });

    assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    assert_eq!(calls.get(), 1);
}
