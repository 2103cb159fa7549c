//! # Retry
//!
//! Bounded, jittered retrying of single cache calls.
use std::future::Future;
use std::time;

use common_redis::CustomRedisError;
use rand::Rng;
use tracing::warn;

#[derive(Clone, Debug)]
/// How often and how patiently a single cache call is attempted.
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never less than 1.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: time::Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: time::Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient: 2,
            initial_interval,
            maximum_interval: initial_interval * 20,
        }
    }

    /// Backoff before retrying after failed attempt number `attempt`, without jitter.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));
        std::cmp::min(candidate_interval, self.maximum_interval)
    }

    /// Run `op` until it succeeds, fails unrecoverably or runs out of attempts.
    /// Up to half of each interval is added as jitter.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, CustomRedisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CustomRedisError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_unrecoverable_error() || attempt >= self.max_attempts => {
                    return Err(err)
                }
                Err(err) => {
                    let interval = self.retry_interval(attempt);
                    let max_jitter_ms = interval.as_millis() as u64 / 2;
                    let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
                    let backoff = interval + time::Duration::from_millis(jitter_ms);
                    warn!(
                        attempt,
                        ?backoff,
                        "cache call {} failed, retrying: {}",
                        what,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, time::Duration::from_millis(50))
    }
}
