// src/application/retry.rs
// Bounded exponential-backoff retry around adapter calls.

use rand::Rng;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the next attempt: `base * 2^(attempt-1)` plus 0-30%
    /// jitter, capped at `max_delay`. `attempt` is 1-based.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let jitter = rand::thread_rng().gen_range(0.0..0.3);
        let with_jitter = (exp as f64 * (1.0 + jitter)) as u64;
        Duration::from_millis(with_jitter.min(self.max_delay.as_millis() as u64))
    }
}

/// Whether an error is worth another attempt: its taxonomy kind is marked
/// retryable, or its message looks like a transient transport problem.
pub fn is_retryable(error: &ExecutionError) -> bool {
    if error.retryable() {
        return true;
    }
    let message = error.message.to_lowercase();
    ["timeout", "timed out", "connection", "network", "rate limit", "too many requests", "temporarily unavailable"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Run `op` with the retry policy. Non-retryable errors propagate on the
/// first failure; exhausting all attempts yields `RETRY_EXHAUSTED` wrapping
/// the last underlying error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> ExecutionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExecutionResult<T>>,
{
    let mut last_error: Option<ExecutionError> = None;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(error);
                }
                log::warn!(
                    "{} attempt {}/{} failed: {}",
                    label,
                    attempt,
                    policy.max_attempts,
                    error
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                last_error = Some(error);
            }
        }
    }

    let last = last_error.unwrap_or_else(|| ExecutionError::new(ErrorKind::Internal));
    Err(ExecutionError::with_message(
        ErrorKind::RetryExhausted,
        format!(
            "{} failed after {} attempts: {}",
            label, policy.max_attempts, last.message
        ),
    )
    .details(json!({
        "attempts": policy.max_attempts,
        "last_error_code": last.kind.code(),
        "last_error_message": last.message,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retryable_error_is_attempted_max_times_then_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ExecutionResult<()> = with_retry(&fast_policy(), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::new(ErrorKind::RateLimited))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RetryExhausted);
        assert!(err.message.contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn non_retryable_error_is_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ExecutionResult<()> = with_retry(&fast_policy(), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::new(ErrorKind::InsufficientBalance))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind, ErrorKind::InsufficientBalance);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_policy(), "test_op", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExecutionError::new(ErrorKind::Timeout))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn message_heuristics_mark_transient_text_retryable() {
        let err = ExecutionError::with_message(ErrorKind::Internal, "upstream connection reset");
        assert!(is_retryable(&err));
        let err = ExecutionError::with_message(ErrorKind::Internal, "bad precision");
        assert!(!is_retryable(&err));
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(1) <= Duration::from_millis(130));
        assert_eq!(policy.delay_for(4), Duration::from_millis(300));
    }
}
