//! Bounded retry and polling helpers
//!
//! Every wait in the harness goes through [`RetryPolicy`]: a fixed ceiling on
//! attempts, exponential backoff with jitter between them, and a
//! [`CancellationToken`] that interrupts the sleep. Nothing in the crate spins
//! without an upper bound.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exponential backoff with an attempt ceiling
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts, for tests and fakes
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Calculate the backoff delay after a given (zero-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());
        if capped_delay.is_finite() {
            Duration::from_secs_f64(capped_delay)
        } else {
            self.max_delay
        }
    }
}

/// Outcome of a single check in [`poll_until`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T, P> {
    /// The awaited condition holds
    Ready(T),
    /// Not there yet; carries the observed state for reporting
    Pending(P),
}

/// Errors from [`poll_until`] and [`retry_transient`]
#[derive(Error, Debug)]
pub enum PollError<P, E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last: P },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(E),
}

/// Poll `check` until it reports [`Readiness::Ready`], the policy's attempt
/// ceiling is reached, or `cancel` fires.
///
/// A check error aborts immediately; only `Pending` results are retried.
pub async fn poll_until<T, P, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<P, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T, P>, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let last = match check().await.map_err(PollError::Failed)? {
            Readiness::Ready(value) => return Ok(value),
            Readiness::Pending(state) => state,
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(PollError::Exhausted {
                attempts: attempt,
                last,
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        debug!(attempt, ?delay, "condition not met yet, polling again");
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Retry `op` while it fails with an error `is_transient` accepts.
///
/// Permanent errors are returned on first sight as [`PollError::Failed`];
/// running out of attempts returns the last transient error in
/// [`PollError::Exhausted`].
pub async fn retry_transient<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_transient: R,
    mut op: F,
) -> Result<T, PollError<E, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => err,
            Err(err) => return Err(PollError::Failed(err)),
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(PollError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        debug!(attempt, ?delay, error = %err, "transient failure, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
