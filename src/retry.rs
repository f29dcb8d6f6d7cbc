//! Retry with exponential backoff and optional jitter.
//!
//! [`retry_with_backoff`] is a free-standing combinator: it wraps any async
//! operation and owns nothing else, so call sites decide how it composes with
//! other wrappers such as [`CircuitBreaker::call`](crate::breaker::CircuitBreaker::call).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// Parameters governing one retry sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Growth factor between consecutive delays. Must be positive and finite.
    pub exponential_base: f64,
    /// Uniformly randomize each delay into `[0, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with a given retry count and the remaining defaults.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Check the policy parameters. `max_retries` and `base_delay` are
    /// non-negative by construction; only the exponential base can be invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.exponential_base.is_finite() || self.exponential_base <= 0.0 {
            return Err(format!(
                "exponential_base must be a positive finite number, got {}",
                self.exponential_base
            ));
        }
        Ok(())
    }

    /// Delay before retry `attempt` (1-indexed):
    /// `base_delay * exponential_base^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .exponential_base
            .powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let nanos = delay.as_nanos().min(u128::from(u64::MAX)) as u64;
        Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
    }
}

/// Failure of a retry sequence.
///
/// Generic over the wrapped operation's error so the triggering error is
/// re-raised to the caller unmodified, never swallowed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The policy itself was invalid; the operation was never attempted.
    InvalidPolicy(String),
    /// Every attempt failed; `source` is the error from the last attempt.
    Exhausted { attempts: u32, source: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::InvalidPolicy(msg) => write!(f, "Invalid retry policy: {msg}"),
            RetryError::Exhausted { attempts, source } => {
                write!(f, "Exhausted after {attempts} attempt(s): {source}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Attempt `op` up to `max_retries + 1` times, sleeping the backoff delay
/// between attempts.
///
/// If `op` succeeds on attempt *k*, it was invoked exactly *k* times and no
/// further delay occurs.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    policy.validate().map_err(RetryError::InvalidPolicy)?;

    let total_attempts = policy.max_retries + 1;
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(source) if attempt >= total_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source,
                });
            }
            Err(_) => {
                let delay = policy.jittered(policy.delay_for_attempt(attempt));
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
