//! Bounded retry-with-timeout for flaky asynchronous operations.
//!
//! Judge calls, agent runs and network fetches all go through [`RetryRunner`]:
//! each attempt races the operation against a timer, failed attempts are
//! logged and retried immediately, and the final failure propagates to the
//! caller. This is a bounded-retry primitive, not a resilience policy engine:
//! no backoff, no jitter, no circuit breaking.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::error::ConfigError;

/// How many attempts an operation gets, and how long each may run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    timeout: Duration,
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` total attempts and a per-attempt
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `max_attempts` is zero or the timeout is
    /// zero.
    pub fn new(max_attempts: u32, timeout: Duration) -> Result<Self, ConfigError> {
        if max_attempts < 1 {
            return Err(ConfigError::InvalidRetryAttempts { max_attempts });
        }
        if timeout.is_zero() {
            return Err(ConfigError::InvalidRetryTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(Self {
            max_attempts,
            timeout,
        })
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Error returned once a retried operation's budget is exhausted.
///
/// Timeouts are kept distinct from operation-thrown errors; both count as
/// attempt failures along the way.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("'{label}' timed out after {timeout_ms}ms on attempt {attempts}/{attempts}")]
    Timeout {
        label: String,
        attempts: u32,
        timeout_ms: u64,
    },

    #[error("'{label}' failed after {attempts} attempt(s): {source}")]
    Exhausted {
        label: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl RetryError {
    /// The underlying operation error, if the final failure was not a timeout.
    pub fn into_source(self) -> Option<anyhow::Error> {
        match self {
            RetryError::Timeout { .. } => None,
            RetryError::Exhausted { source, .. } => Some(source),
        }
    }
}

/// The outcome of a single failed attempt.
enum AttemptFailure {
    TimedOut,
    Failed(anyhow::Error),
}

/// Runs asynchronous operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RetryRunner {
    policy: RetryPolicy,
}

impl RetryRunner {
    /// Create a runner with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy this runner applies.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Each attempt races a fresh invocation of `operation` against the
    /// policy timeout; whichever settles first wins. A failed attempt is
    /// logged and the next starts immediately. After the final attempt the
    /// failure propagates: a timeout as [`RetryError::Timeout`], an operation
    /// error wrapped in [`RetryError::Exhausted`] with the original as its
    /// source.
    ///
    /// Timeout cancellation is advisory: the timed-out future is dropped, but
    /// any in-flight network call or child process it started is not killed.
    /// A late result from an abandoned attempt has no effect on the run.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let timeout = self.policy.timeout();
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            let failure = match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Attempt failed"
                    );
                    AttemptFailure::Failed(err)
                }
                Err(_elapsed) => {
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        timeout_ms = timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    AttemptFailure::TimedOut
                }
            };

            if attempt < max_attempts {
                warn!(label, next_attempt = attempt + 1, "Retrying immediately");
            }
            last_failure = Some(failure);
        }

        Err(match last_failure.expect("at least one attempt was made") {
            AttemptFailure::TimedOut => RetryError::Timeout {
                label: label.to_string(),
                attempts: max_attempts,
                timeout_ms: timeout.as_millis() as u64,
            },
            AttemptFailure::Failed(source) => RetryError::Exhausted {
                label: label.to_string(),
                attempts: max_attempts,
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(attempts: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::new(0, Duration::from_secs(1)).is_err());
        assert!(RetryPolicy::new(1, Duration::ZERO).is_err());
        assert!(RetryPolicy::new(1, Duration::from_millis(1)).is_ok());
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures() {
        let runner = RetryRunner::new(policy(3, 1000));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = runner
            .run("flaky", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("transient failure {n}");
                    }
                    Ok(42u32)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_propagates_after_exact_attempts() {
        let runner = RetryRunner::new(policy(2, 1000));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = runner
            .run("doomed", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("persistent failure")
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result.unwrap_err() {
            RetryError::Exhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 2);
                assert!(source.to_string().contains("persistent failure"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_operation_error() {
        let runner = RetryRunner::new(policy(2, 10));

        let result: Result<(), _> = runner
            .run("slow", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        match result.unwrap_err() {
            RetryError::Timeout { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success_makes_one_call() {
        let runner = RetryRunner::new(policy(5, 1000));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = runner
            .run("steady", move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
