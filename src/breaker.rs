//! Failure-isolating circuit breaker.
//!
//! One breaker instance guards one protected call type and is shared by every
//! task the owning orchestrator executes, so all status and counter updates
//! happen under a mutex. The guard is only held to admit a call and to record
//! its outcome, never across the protected call itself.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The three states of the breaker.
///
/// `Closed` (initial) → `Open` → `HalfOpen` → `Closed` or back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerStatus::Closed => write!(f, "CLOSED"),
            BreakerStatus::Open => write!(f, "OPEN"),
            BreakerStatus::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    status: BreakerStatus,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the operation.
    Open { remaining: Duration },
    /// The operation ran and failed; the error is passed through unchanged.
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { remaining } => {
                write!(f, "Circuit open, retry in {}ms", remaining.as_millis())
            }
            BreakerError::Operation(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// Three-state failure-isolation gate around a single call type.
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures and
    /// allows a half-open trial after `timeout` has elapsed.
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                status: BreakerStatus::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn status(&self) -> BreakerStatus {
        self.lock().status
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute `op` through the breaker.
    ///
    /// While `Open` and inside the cooldown window the call is rejected
    /// immediately and `op` is never invoked. After the cooldown, exactly one
    /// trial call is admitted; its outcome decides between `Closed` and a
    /// fresh `Open` period. The breaker itself never retries.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = self.admit()?;

        let outcome = op().await;

        let mut inner = self.lock();
        match &outcome {
            Ok(_) => match inner.status {
                BreakerStatus::HalfOpen if trial => {
                    inner.status = BreakerStatus::Closed;
                    inner.failure_count = 0;
                    inner.trial_in_flight = false;
                }
                BreakerStatus::Closed => {
                    inner.failure_count = 0;
                }
                // A straggler that was admitted before the breaker opened;
                // its success says nothing about the current period.
                _ => {}
            },
            Err(_) => match inner.status {
                BreakerStatus::HalfOpen if trial => {
                    inner.status = BreakerStatus::Open;
                    inner.last_failure = Some(Instant::now());
                    inner.trial_in_flight = false;
                }
                BreakerStatus::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.threshold {
                        inner.status = BreakerStatus::Open;
                        inner.last_failure = Some(Instant::now());
                    }
                }
                _ => {}
            },
        }
        drop(inner);

        outcome.map_err(BreakerError::Operation)
    }

    /// Decide under the lock whether the call may proceed. Returns whether
    /// this call is the half-open trial.
    fn admit<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.status {
            BreakerStatus::Closed => Ok(false),
            BreakerStatus::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed < self.timeout {
                    Err(BreakerError::Open {
                        remaining: self.timeout - elapsed,
                    })
                } else {
                    inner.status = BreakerStatus::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
            BreakerStatus::HalfOpen => {
                if inner.trial_in_flight {
                    // Exactly one trial call; everyone else waits out the trial.
                    Err(BreakerError::Open {
                        remaining: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }
}
