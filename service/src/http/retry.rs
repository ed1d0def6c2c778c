//! Retry with exponential backoff.
//!
//! [`run_with_retry`] wraps any async operation whose failures are classified as
//! [`AttemptError::Retryable`] or [`AttemptError::Fatal`]. Retryable failures consume the
//! attempt budget and sleep `base * 2^(n-1)` (capped, plus jitter) between attempts; fatal
//! failures return immediately without consuming budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping. Used in tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay after `failed_attempts` failures (1-based).
    #[must_use]
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Full sleep before the next attempt. A server-provided `Retry-After` wins when longer.
    #[must_use]
    pub fn delay_for(&self, failed_attempts: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff(failed_attempts);
        if !self.jitter.is_zero() {
            let max_jitter = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
        }
        match retry_after {
            Some(server) if server > delay => server,
            _ => delay,
        }
    }
}

/// Classification of a single failed attempt.
#[derive(Debug)]
pub enum AttemptError<E> {
    Retryable {
        error: E,
        retry_after: Option<Duration>,
    },
    Fatal(E),
}

impl<E> AttemptError<E> {
    pub const fn retryable(error: E) -> Self {
        Self::Retryable {
            error,
            retry_after: None,
        }
    }
}

/// Final failure after the policy gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error stopped the loop.
    Fatal { attempts: u32, error: E },
}

/// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
///
/// `label` only feeds log events.
///
/// # Errors
/// Returns [`RetryError::Fatal`] for the first fatal failure and
/// [`RetryError::Exhausted`] once `policy.max_attempts` retryable failures occurred.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(error)) => {
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error,
                })
            }
            Err(AttemptError::Retryable { error, retry_after }) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }

                let delay = policy.delay_for(attempt, retry_after);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
