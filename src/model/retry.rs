//! Retry with exponential backoff for model calls
//!
//! Model calls are idempotent given identical inputs (modulo sampling), so
//! transient failures are retried with bounded binary-exponential backoff
//! and ±25% jitter. Every attempt runs under a deadline.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::RetryConfig;
use crate::errors::{PipelineError, Result};
use crate::model::{Embedding, EmbeddingModel, GenerationModel};

/// Maximum number of attempts
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff
const BASE_DELAY_MS: u64 = 500;

/// Maximum delay cap
const MAX_DELAY_MS: u64 = 16000;

/// Per-attempt deadline
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(180);

/// Retry manager with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Maximum attempts (including the first)
    max_retries: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    /// Deadline applied to each attempt
    attempt_timeout: Duration,

    /// Enable jitter
    enable_jitter: bool,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManager {
    /// Create new retry manager with default settings
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            attempt_timeout: ATTEMPT_TIMEOUT,
            enable_jitter: true,
        }
    }

    /// Create retry manager with custom settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay_ms,
            ..Self::new()
        }
    }

    /// Build from the `[retry]` configuration section
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::with_config(config.max_retries, config.base_delay_ms)
    }

    /// Override the per-attempt deadline
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Execute operation with retry logic. The last error is returned once
    /// attempts are exhausted.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = match timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    duration_ms: self.attempt_timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying model call");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calculate delay for given attempt number
    fn calculate_delay(&self, attempt: u32) -> Duration {
        // Binary exponential backoff: 2^attempt
        let exponential_delay = self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));

        let delay_ms = exponential_delay.min(self.max_delay_ms);

        // ±25% random variation
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Get max retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Wraps a model so every call goes through a [`RetryManager`]
pub struct RetryingModel<M> {
    inner: M,
    retry: RetryManager,
}

impl<M> RetryingModel<M> {
    pub fn new(inner: M, retry: RetryManager) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

#[async_trait]
impl<M: GenerationModel> GenerationModel for RetryingModel<M> {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.retry
            .execute_with_retry(|| self.inner.complete(prompt, temperature))
            .await
    }
}

#[async_trait]
impl<M: EmbeddingModel> EmbeddingModel for RetryingModel<M> {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.retry.execute_with_retry(|| self.inner.embed(text)).await
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }
}
