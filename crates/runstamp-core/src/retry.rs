//! Retrying remote caller: bounded retries with exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,

    /// Backoff multiplier.
    pub factor: f64,

    /// Delay after the first failure.
    pub min_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Two retries, doubling from 1s, capped at 10s.
    pub fn default_remote() -> Self {
        Self {
            max_retries: 2,
            factor: 2.0,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Retries without waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            factor: 1.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the failed attempt `attempt` (0-indexed):
    /// `min(max_delay, min_delay * factor^attempt)`.
    ///
    /// Example with min=1s, factor=2.0, max=10s:
    /// - attempt 0: 1s
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 4: 10s (capped)
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.min_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_remote()
    }
}

/// Result of one retrying call.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    Exhausted { attempts: u32, last_error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

impl<T, E: fmt::Display + fmt::Debug> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, RetryExhausted<E>> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(RetryExhausted {
                attempts,
                last_error,
            }),
        }
    }
}

/// All attempts failed; carries the last error.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted<E: fmt::Display + fmt::Debug> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or `policy` is exhausted.
///
/// Every failed attempt is logged with its index. The wrapper adds delays
/// between attempts but no deadline on a single attempt.
pub async fn with_retry<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation, attempt, "succeeded after retry");
                }
                return RetryOutcome::Success(value);
            }
            Err(error) => {
                let attempts = attempt + 1;
                tracing::warn!(
                    operation,
                    attempt = attempts,
                    max_attempts,
                    error = %error,
                    "remote call failed"
                );
                if attempts >= max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts,
                        last_error: error,
                    };
                }
                let delay = policy.next_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt = attempts;
            }
        }
    }
}
