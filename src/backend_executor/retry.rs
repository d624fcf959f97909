//! Transport-level retry for the chat backend
//!
//! Only failures that say nothing about the reply (timeouts, rate limits,
//! dropped connections, 5xx) are retried here. A reply that arrives but
//! cannot be parsed into a patch is the repair engine's business.

use super::types::{BackendError, BackendExecutor, BackendRequest, BackendResponse, RetryPolicy};
use async_trait::async_trait;
use std::time::Duration;

/// Backend wrapper that resends a request after transient transport errors
pub struct TransportRetry<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: BackendExecutor> TransportRetry<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Wait before resend number `retry` (0-based), or `None` to give up
    fn next_delay(&self, error: &BackendError, retry: u32) -> Option<Duration> {
        if !error.is_retryable() || retry >= self.policy.max_retries {
            return None;
        }
        // A server-sent Retry-After is honoured, within the backoff ceiling
        let delay = match error.retry_after() {
            Some(after) => after.min(self.policy.max_delay),
            None => self.policy.delay_for_attempt(retry),
        };
        Some(delay)
    }
}

#[async_trait]
impl<B: BackendExecutor> BackendExecutor for TransportRetry<B> {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut retry = 0;
        loop {
            let error = match self.backend.execute(request).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let Some(delay) = self.next_delay(&error, retry) else {
                if retry > 0 {
                    tracing::warn!(
                        backend = %self.backend.name(),
                        retries = retry,
                        error = %error,
                        "giving up on backend request"
                    );
                }
                return Err(error);
            };

            retry += 1;
            tracing::warn!(
                backend = %self.backend.name(),
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "resending backend request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }
}
