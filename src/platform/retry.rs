use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{AppError, Result};

/// Bounded exponential backoff for calls to the ticket tracker.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retries_used + 1`.
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    /// Run `op`, retrying only errors that report themselves as retryable.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries_used = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries_used < self.max_retries => {
                    self.pause(operation, retries_used, &e).await;
                    retries_used += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`run`](Self::run), for calls that create something.
    ///
    /// A transient failure may arrive after the server already created the
    /// resource, so every retry first asks `find_existing` and returns what it
    /// finds instead of creating a second one.
    pub async fn run_create<T, F, Fut, L, LFut>(
        &self,
        operation: &str,
        mut create: F,
        mut find_existing: L,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        L: FnMut() -> LFut,
        LFut: Future<Output = Result<Option<T>>>,
    {
        let mut retries_used = 0;
        let mut maybe_created = false;
        loop {
            let attempt = if maybe_created {
                match find_existing().await {
                    Ok(Some(existing)) => {
                        tracing::info!(operation, "Found resource from an earlier attempt");
                        return Ok(existing);
                    }
                    Ok(None) => create().await,
                    Err(e) => Err(e),
                }
            } else {
                create().await
            };

            match attempt {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries_used < self.max_retries => {
                    maybe_created = true;
                    self.pause(operation, retries_used, &e).await;
                    retries_used += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pause(&self, operation: &str, retries_used: u32, error: &AppError) {
        let delay = self.backoff(retries_used);
        tracing::warn!(
            operation,
            attempt = retries_used + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
