//! Retry combinators
//!
//! `retry_on_conflict` guards read-modify-write cycles against concurrent
//! writers; `with_retry` polls a fallible check on a fixed interval.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bounded exponential backoff for optimistic concurrency retries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of attempts, the first one included
    pub steps: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial, self.max)
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
///
/// The exponent is capped at 16 so large attempt counts cannot overflow.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

/// Run `f` until it succeeds or fails with something other than a conflict.
///
/// Conflicts are retried up to `backoff.steps` attempts in total, after which
/// the last conflict is returned wrapped in [`Error::RetryExhausted`].
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                attempt += 1;
                if attempt >= steps {
                    warn!("conflict retry budget exhausted after {} attempts", attempt);
                    return Err(Error::RetryExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                let delay = backoff.delay(attempt - 1);
                debug!("write conflict, retrying in {:?} (attempt {})", delay, attempt);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `f` up to `attempts` times, sleeping `interval` after each failure
pub async fn with_retry<T, F, Fut>(interval: Duration, attempts: u32, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(e),
                })
            }
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(interval).await;
            }
        }
    }
}
