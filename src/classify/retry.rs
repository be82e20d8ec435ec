//! Bounded retries with exponential backoff for provider calls.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// The delay after the failed `attempt` (1-based): initial, 2x, 4x, ... capped at the maximum.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

/// Runs `operation` until it succeeds, fails with an error that is not worth retrying, or the
/// attempt budget is spent. Both the operation and the backoff sleep abort as soon as `cancel`
/// fires.
///
/// The operation receives the 1-based attempt number.
pub async fn run<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if attempt > 1 {
            debug!(operation = operation_name, attempt, "retrying");
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(ProviderError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(error),
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            "{error}, will retry"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
