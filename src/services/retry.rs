//! Bounded retry with exponential backoff and jitter.
//!
//! Delay before retry `n` (0-based) is `base * 2^n + jitter`, where jitter
//! is drawn from `0..=min(jitter_ms, base - 1)`. Keeping jitter below the
//! base makes successive delays strictly increasing.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::SyncConfig;
use crate::notice::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub base_ms: u64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            retries: config.persist_retries,
            base_ms: config.persist_retry_base_ms,
            jitter_ms: config.persist_retry_jitter_ms,
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor))
    }

    fn max_jitter_ms(&self) -> u64 {
        self.jitter_ms.min(self.base_ms.saturating_sub(1))
    }

    fn delay(&self, retry: u32) -> Duration {
        let max_jitter = self.max_jitter_ms();
        let jitter = if max_jitter == 0 { 0 } else { rand::rng().random_range(0..=max_jitter) };
        self.base_delay(retry) + Duration::from_millis(jitter)
    }
}

/// Run `op` up to `1 + policy.retries` times, sleeping between attempts.
/// Non-retryable errors stop immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &'static str, mut op: F) -> Result<T, E>
where
    E: ErrorCode,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = policy.retries + 1;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < total && e.retryable() => {
                let delay = policy.delay(attempt - 1);
                warn!(
                    error = %e,
                    op = label,
                    attempt,
                    total,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
