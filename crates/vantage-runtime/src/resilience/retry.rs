//! Bounded exponential retry for provider calls.
//!
//! Retries are per-call and sit inside a single fallback layer: a call
//! that exhausts its retries counts as one failure against the circuit
//! breaker, and the orchestrator moves on to the next layer. Errors the
//! provider marks non-retryable (auth, malformed payloads, client-side
//! rejections) fail immediately.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::providers::ProviderError;
use crate::resilience::circuit_breaker::duration_secs;

/// Retry configuration for a single provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: usize,

    /// Delay before the first retry (milliseconds).
    pub min_delay_ms: u64,

    /// Cap on the exponential backoff (seconds).
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 200,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }

    /// Run `op` with this policy, retrying transient provider errors.
    pub async fn run<T, F, Fut>(&self, provider: &str, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        op.retry(self.backoff())
            .when(|e: &ProviderError| e.is_retryable())
            .notify(|e, delay| {
                tracing::warn!(
                    provider = %provider,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "provider call failed, retrying"
                );
            })
            .await
    }
}
