//! Bounded retry with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

/// Retry parameters for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
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

    /// One call, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Result of [`RetryExecutor::run`]: the value or the last error, plus how
/// many calls were made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, FetchError>,
    pub tries: u32,
    /// Last genuine failure seen, kept even when the run ends in
    /// [`FetchError::Cancelled`].
    pub last_failure: Option<FetchError>,
}

/// Runs one operation under a [`RetryPolicy`].
///
/// Backoff sleeps are async, so a URL waiting out its delay does not block
/// other URLs the engine is resolving concurrently. Cancellation is checked before every call
/// and interrupts both the call and the sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `op(attempt)` until it succeeds, the error is not retryable,
    /// attempts run out, or `cancel` fires.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut tries = 0;
        let mut last_failure: Option<FetchError> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(tries, last_failure);
            }

            tries += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                r = op(attempt) => r,
            };

            match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        tries,
                        last_failure: None,
                    };
                }
                Err(FetchError::Cancelled) => {
                    return RetryOutcome::cancelled(tries, last_failure);
                }
                Err(e) if !e.is_retryable() => {
                    return RetryOutcome {
                        result: Err(e.clone()),
                        tries,
                        last_failure: Some(e),
                    };
                }
                Err(e) => {
                    if attempt < max_attempts {
                        let delay = self.policy.delay_for_attempt(attempt);
                        tracing::debug!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Attempt failed, retrying"
                        );
                        last_failure = Some(e);

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return RetryOutcome::cancelled(tries, last_failure);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        last_failure = Some(e);
                    }
                }
            }
        }

        RetryOutcome {
            result: Err(last_failure.clone().unwrap_or(FetchError::Cancelled)),
            tries,
            last_failure,
        }
    }
}

impl<T> RetryOutcome<T> {
    fn cancelled(tries: u32, last_failure: Option<FetchError>) -> Self {
        Self {
            result: Err(FetchError::Cancelled),
            tries,
            last_failure,
        }
    }
}
