//! Bounded retry for registry calls.
//!
//! Registries fail transiently (timeouts, 502/503, rate limits) often enough
//! that a single failure should not end a resolution. Failures are retried
//! immediately, without backoff, until the attempt budget is spent.

use std::future::Future;
use tracing::debug;

/// Maximum number of attempts for one registry call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// Every attempt failed with a transient error; holds the last one
    Exhausted { error: E, attempts: u32 },
    /// A non-transient error; returned on the attempt it happened
    Failed(E),
}

impl<T, E> RetryOutcome<T, E> {
    /// Collapse into a `Result`, losing the exhausted/failed distinction
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { error, .. } | RetryOutcome::Failed(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` calls in total (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with an error `is_transient`
    /// rejects, or the attempt budget is spent.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_transient: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(error) if !is_transient(&error) => return RetryOutcome::Failed(error),
                Err(error) if attempt >= self.max_attempts => {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        %error,
                        "retrying registry call"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn is_transient(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::default()
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>("ok")
                },
                is_transient,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::Success("ok")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::default()
            .run(
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(42)
                    }
                },
                is_transient,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::Success(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::default()
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                },
                is_transient,
            )
            .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                error: TestError::Transient,
                attempts: 3
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::default()
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                },
                is_transient,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::Failed(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_allows_at_least_one_attempt() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);

        let outcome: RetryOutcome<(), _> = policy
            .run(|| async { Err(TestError::Transient) }, is_transient)
            .await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert!(outcome.into_result().is_err());
    }
}
