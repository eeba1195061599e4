use log::{ debug, warn };
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::error::CompletionError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, base_delay, max_delay }
    }

    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// `base * 2^attempt` plus up to one `base` of jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let jitter = if base_ms > 0 { rand::thread_rng().gen_range(0..base_ms) } else { 0 };
        let delay = Duration::from_millis(exp.saturating_add(jitter));
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the zero-based attempt number.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, CompletionError>
        where F: FnMut(u32) -> Fut, Fut: Future<Output = Result<T, CompletionError>>
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Transient {} error (attempt {}/{}): {}. Retrying in {:?}",
                        e.kind,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Giving up after {} attempt(s): {}", attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }
}
