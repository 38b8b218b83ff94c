//! Bounded retry helper
//!
//! One policy shape shared by the capture and recognition stages:
//! (max attempts, fixed delay, retryable predicate).

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Retry policy for one stage
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times with a fixed delay between
/// attempts. `op` receives the 1-based attempt number. Non-retryable errors
/// and the final attempt's error are returned as-is.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, stage: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(
                    stage = stage,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Stage attempt failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(policy(), "capture", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(Error::Capture("transient".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(policy(), "recognition", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Recognition("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Recognition(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(policy(), "transcode", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transcode("bad container".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Transcode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
