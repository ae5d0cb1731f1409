//! Exponential backoff retry policy for network operations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::StoreError;

/// Applies a [`RetryConfig`] to a fallible async operation, retrying
/// while [`StoreError::is_retryable`] holds and attempts remain.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy from a retry configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying retryable failures up to `config.count`
    /// additional times. On exhaustion, the final error is wrapped in
    /// [`StoreError::RetriesExhausted`] carrying `resource` and the
    /// number of attempts made.
    pub async fn execute<F, Fut, T>(&self, resource: &str, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(resource, attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        debug!(resource, %error, "non-retryable error");
                        return Err(error);
                    }

                    if attempt >= self.config.count {
                        warn!(resource, attempts = attempt + 1, %error, "retries exhausted");
                        return Err(StoreError::RetriesExhausted {
                            attempts: attempt + 1,
                            resource: resource.to_string(),
                            source: Box::new(error),
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(resource, attempt = attempt + 1, ?delay, %error, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.min_timeout.as_millis() as f64 * self.config.factor.powi(attempt as i32);
        let capped = base.min(self.config.max_timeout.as_millis() as f64);

        let final_delay = if self.config.randomize {
            let jitter = rand::thread_rng().gen_range(0.0..0.5);
            capped * (1.0 + jitter)
        } else {
            capped
        };

        Duration::from_millis(final_delay as u64)
    }
}
