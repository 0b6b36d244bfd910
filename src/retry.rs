// src/retry.rs

//! Bounded exponential backoff with full jitter.
//!
//! Only calls to upstream data providers are retried. Module runs never are.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Decides whether a failed attempt is worth repeating.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// HTTP statuses that are retried: 429 and every 5xx. Other 4xx never are.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Draw each delay uniformly from `[0, backoff]` instead of sleeping the
    /// full backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound of the delay after failed attempt `attempt` (0-indexed):
    /// `min(max_delay, base_delay * 2^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay actually slept after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.backoff(attempt);
        if self.jitter {
            cap.mul_f64(rand::random::<f64>())
        } else {
            cap
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Returns the last error in the latter cases.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!(what, error = %e, "not retrying");
                return Err(e);
            }
            Err(e) if attempt + 1 >= attempts => {
                warn!(what, attempts, error = %e, "giving up after retries");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(what, attempt = attempt + 1, ?delay, error = %e, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
