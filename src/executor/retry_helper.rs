//! Retry helper for pipeline steps.
//!
//! This module provides a generic retry mechanism that:
//! - Respects RetryPolicy (max attempts, backoff delays)
//! - Bounds every attempt with the policy's attempt timeout
//! - Uses RetryableError trait to determine which errors to retry

use crate::core::{RetryPolicy, RetryableError};
use crate::gateway::GatewayError;
use std::future::Future;
use std::time::Duration;

/// An attempt ran past the policy's attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimedOut(pub Duration);

impl From<AttemptTimedOut> for GatewayError {
    fn from(t: AttemptTimedOut) -> Self {
        GatewayError::Timeout(t.0)
    }
}

/// Executes a fallible operation with retry logic.
///
/// On failure the error is retried only if it is retryable (via
/// [`RetryableError`]) and attempts remain; otherwise it is returned. A timed
/// out attempt is converted into `E` through [`AttemptTimedOut`] and goes
/// through the same classification.
///
/// # Arguments
///
/// * `step` - Name of the step, for logs
/// * `policy` - Attempts, backoff and per-attempt timeout
/// * `operation` - The async operation to execute (receives current attempt number)
pub async fn retry_with_policy<F, Fut, T, E>(
    step: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + From<AttemptTimedOut> + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        let error = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_elapsed) => E::from(AttemptTimedOut(policy.attempt_timeout)),
        };

        if !error.is_retryable() {
            tracing::debug!(step, attempt, %error, "Step failed with non-retryable error");
            return Err(error);
        }

        match policy.delay_for_attempt(attempt) {
            Some(delay) => {
                tracing::debug!(
                    step,
                    attempt,
                    max_attempts = policy.max_attempts,
                    %error,
                    ?delay,
                    "Step failed with retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                tracing::warn!(
                    step,
                    attempt,
                    max_attempts = policy.max_attempts,
                    %error,
                    "Step failed and exhausted retry attempts"
                );
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Failed { retryable: bool },
        TimedOut,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            match self {
                TestError::Failed { retryable } => *retryable,
                TestError::TimedOut => true,
            }
        }
    }

    impl From<AttemptTimedOut> for TestError {
        fn from(_: AttemptTimedOut) -> Self {
            TestError::TimedOut
        }
    }

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        attempt_timeout: Duration::from_millis(200),
    };

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy("step", FAST, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy("step", FAST, |attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(TestError::Failed { retryable: true })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy("step", FAST, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Failed { retryable: false })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(TestError::Failed { retryable: false })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Only tried once
    }

    #[tokio::test]
    async fn test_retry_exhausted_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy("step", FAST, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Failed { retryable: true })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Tried max_attempts times
    }

    #[tokio::test]
    async fn test_each_attempt_is_timed_out() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let policy = FAST.with_attempt_timeout(Duration::from_millis(20));

        let result = retry_with_policy("step", policy, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TestError>(1)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::TimedOut)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy("step", RetryPolicy::NONE, |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Failed { retryable: true })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1); // No retries
    }
}
