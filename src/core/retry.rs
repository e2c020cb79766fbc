// =============================================================================
// STEP RETRY BEHAVIOR
// =============================================================================
//
// Every pipeline step that calls out of process (speech synthesis, video
// synthesis, read-URL issuance, async submission, asset import) runs under a
// `RetryPolicy`:
//
// 1. Each attempt is bounded by `attempt_timeout`. An attempt that exceeds it
//    counts as a failed, retryable attempt.
// 2. On a retryable error with attempts remaining, the step sleeps for the
//    backoff delay and tries again.
// 3. On a non-retryable error (malformed response, provider-reported failure,
//    4xx) the step fails immediately. Retrying would reproduce the same answer.
// 4. When attempts are exhausted the last error is returned and the engine
//    converts it into the job's `failed` state.
//
// Whether an error is retryable is decided by the error type through the
// `RetryableError` trait.
// =============================================================================

use std::time::Duration;

/// Configuration for step retry behavior.
///
/// # Examples
///
/// ```
/// use eikon::core::RetryPolicy;
/// use std::time::Duration;
///
/// const FAST: RetryPolicy = RetryPolicy {
///     max_attempts: 3,
///     initial_delay: Duration::from_millis(10),
///     max_delay: Duration::from_millis(100),
///     backoff_multiplier: 2.0,
///     attempt_timeout: Duration::from_secs(1),
/// };
///
/// assert_eq!(FAST.delay_for_attempt(1), Some(Duration::from_millis(10)));
/// assert_eq!(FAST.delay_for_attempt(2), Some(Duration::from_millis(20)));
/// assert_eq!(FAST.delay_for_attempt(3), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    ///
    /// For example, `max_attempts = 3` means:
    /// - Attempt 1: immediate (first try)
    /// - Attempt 2: after initial_delay
    /// - Attempt 3: after initial_delay * backoff_multiplier
    pub max_attempts: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential backoff).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    ///
    /// Each retry delay is calculated as:
    /// `min(initial_delay * backoff_multiplier^(attempt-1), max_delay)`
    pub backoff_multiplier: f64,

    /// Upper bound on a single attempt. Exceeding it counts as a failed attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// No retries - fail on the first error.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff_multiplier: 1.0,
        attempt_timeout: Duration::from_secs(900),
    };

    /// Standard policy for provider calls.
    ///
    /// - Max attempts: 3 (initial try + 2 retries)
    /// - Initial delay: 1 second
    /// - Max delay: 30 seconds
    /// - Backoff: exponential (2x each time)
    /// - Attempt timeout: 15 minutes (GPU synthesis is slow)
    ///
    /// Retry schedule: immediate → 1s → 2s
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        attempt_timeout: Duration::from_secs(900),
    };

    /// Create a policy with custom max_attempts (uses standard delays and timeout).
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::STANDARD
        }
    }

    /// Returns a copy of this policy with a different per-attempt timeout.
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Calculate the delay before the next retry attempt.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt that just failed (1-indexed)
    ///
    /// # Returns
    ///
    /// Duration to wait before the next attempt, or None if no more retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as f64;
        let multiplier = self.backoff_multiplier.powf(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;

        Some(Duration::from_secs_f64(
            delay_secs.min(self.max_delay.as_secs_f64()),
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_attempts: u32) -> Self {
        Self::with_max_attempts(max_attempts)
    }
}

/// Trait for error types to specify whether they should trigger a retry.
///
/// - `true`: the error is transient (timeout, connection reset, 5xx). Another
///   attempt may succeed.
/// - `false`: the error is permanent (malformed payload, rejected request).
///   Another attempt would reproduce it.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

impl<T: RetryableError> RetryableError for Box<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}

impl<T: RetryableError> RetryableError for std::sync::Arc<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}
