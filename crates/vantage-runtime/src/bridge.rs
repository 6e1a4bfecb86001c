//! Composes the cache and the circuit breaker.
//!
//! Cached data stays servable while a provider's circuit is open, and a
//! cache hit is by default *not* recorded as a circuit success: serving
//! stale data says nothing about current provider health, and counting
//! it would mask a real outage.

use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use vantage_core::{RiskProfile, TaskType};

use crate::cache::ResponseCache;
use crate::providers::ProviderError;
use crate::resilience::{CircuitBreaker, CircuitStatus};

/// How the bridge satisfied (or failed to satisfy) a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Served from cache; no provider call was made.
    CacheHit,
    /// Provider call succeeded; result written back to cache.
    Fresh,
    /// Cache missed and the circuit is open; no call was attempted.
    CircuitOpenNoCache,
    /// The provider call itself failed.
    CallFailed(String),
}

/// Outcome of one bridged lookup.
#[derive(Debug)]
pub struct BridgeResult {
    pub profile: Option<RiskProfile>,
    pub outcome: BridgeOutcome,
    pub circuit: CircuitStatus,
    pub elapsed_ms: u64,
}

/// Cache-first, circuit-protected provider access.
pub struct CacheCircuitBridge {
    cache: Arc<ResponseCache>,
    breaker: Arc<CircuitBreaker>,
    count_cache_hit_as_success: bool,
}

impl CacheCircuitBridge {
    pub fn new(cache: Arc<ResponseCache>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            cache,
            breaker,
            count_cache_hit_as_success: false,
        }
    }

    /// Treat cache hits as evidence of provider health. Off by default.
    pub fn count_cache_hits_as_success(mut self, enabled: bool) -> Self {
        self.count_cache_hit_as_success = enabled;
        self
    }

    /// Cache-first lookup with a circuit-protected fallback call.
    ///
    /// The cache is consulted regardless of circuit state. On a miss,
    /// the call only proceeds if the provider's circuit allows it; a
    /// successful call records circuit success and writes the result
    /// back to both cache tiers.
    pub async fn get_with_fallback<F, Fut>(
        &self,
        operation: TaskType,
        provider: &str,
        query: &str,
        context: Option<&JsonValue>,
        fallback_fn: F,
    ) -> BridgeResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RiskProfile, ProviderError>>,
    {
        let started = Instant::now();

        if let Some(profile) = self.cache.get(operation, query, context).await {
            if self.count_cache_hit_as_success {
                self.breaker.record_success(provider).await;
            }
            return BridgeResult {
                profile: Some(profile),
                outcome: BridgeOutcome::CacheHit,
                circuit: self.breaker.status(provider),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        self.call_protected(operation, provider, query, context, fallback_fn)
            .await
    }

    /// Circuit-protected provider call with cache write-back, skipping
    /// the cache read. Used when the caller has already consulted the
    /// cache and found nothing usable.
    pub async fn call_protected<F, Fut>(
        &self,
        operation: TaskType,
        provider: &str,
        query: &str,
        context: Option<&JsonValue>,
        fallback_fn: F,
    ) -> BridgeResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RiskProfile, ProviderError>>,
    {
        let started = Instant::now();

        self.breaker.sync_from_store(provider).await;
        if !self.breaker.is_available(provider) {
            tracing::warn!(provider = %provider, "circuit open and cache empty, failing fast");
            return BridgeResult {
                profile: None,
                outcome: BridgeOutcome::CircuitOpenNoCache,
                circuit: self.breaker.status(provider),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        match fallback_fn().await {
            Ok(profile) => {
                self.breaker.record_success(provider).await;
                self.cache.set(operation, query, context, &profile, None).await;
                BridgeResult {
                    profile: Some(profile),
                    outcome: BridgeOutcome::Fresh,
                    circuit: self.breaker.status(provider),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => {
                self.breaker.record_failure(provider, &e.to_string()).await;
                BridgeResult {
                    profile: None,
                    outcome: BridgeOutcome::CallFailed(e.to_string()),
                    circuit: self.breaker.status(provider),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}
