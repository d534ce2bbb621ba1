//! Retry policy: decides backoff delays.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::domain::ClientError;

/// Bounded exponential backoff for collaborator calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single try, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Should another try follow failed try number `attempts` (1-indexed)?
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next try, after `attempts` failed tries (1-indexed).
    ///
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    ///
    /// Example with base_delay=200ms, multiplier=2.0:
    /// - attempt 1: 200ms
    /// - attempt 2: 400ms
    /// - attempt 3: 800ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = (base_secs * self.multiplier.powi(exponent)).min(self.max_delay.as_secs_f64());
        let delay = Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            rand::thread_rng().gen_range(half..=delay)
        } else {
            delay
        }
    }

    /// Like [`next_delay`](Self::next_delay), but never shorter than a
    /// server-provided `retry_after`.
    pub fn delay_for(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.next_delay(attempts);
        match retry_after {
            Some(after) => delay.max(after),
            None => delay,
        }
    }

    /// Run `f` with a per-try `timeout`, retrying transient failures.
    /// A try that outlives `timeout` counts as [`ClientError::Timeout`].
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        timeout: Duration,
        mut f: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout),
            };
            match result {
                Err(err) if err.is_transient() && self.should_retry(attempts) => {
                    let delay = self.delay_for(attempts, err.retry_after());
                    tracing::warn!(op, attempts, ?delay, error = %err, "transient failure; retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
