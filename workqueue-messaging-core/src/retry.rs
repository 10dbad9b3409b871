// workqueue-messaging-core/src/retry.rs
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::MessagingError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

/// 30 attempts within about a minute: 0.5 s, 1 s, then 2 s between tries.
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = self.multiplier.max(1).saturating_pow(exp);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of all waits when every attempt fails.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|a| self.delay_for(a)).sum()
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` is reached, sleeping
/// between attempts. The closure receives the 1-based attempt number.
/// Only `Connection` errors are retried; anything else is returned at once.
/// Exhaustion returns the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, MessagingError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        info!("{what}: attempt {attempt}/{max_attempts}");
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !matches!(e, MessagingError::Connection(_)) => {
                error!("{what}: not retrying: {e}");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                error!("{what}: giving up after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!("{what} failed: {e}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
