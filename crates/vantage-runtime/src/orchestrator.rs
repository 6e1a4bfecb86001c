//! Five-layer fallback orchestration.
//!
//! The orchestrator guarantees that a caller always receives *some*
//! usable answer. Layers run strictly in order, stopping at the first
//! sufficient result:
//!
//! 0. exact cache match
//! 1. primary search provider, cross-checked by the validator provider
//! 2. synthesis consensus merge over the routed model tier
//! 3. deterministic rule-based merge of everything gathered so far
//! 4. graceful degradation (never fails)
//!
//! `resolve` is infallible by design: every failure route lands in
//! layer 4, and the whole walk runs under a hard deadline.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};

use async_trait::async_trait;

use vantage_core::{
    ConfidenceTier, ConsensusSource, ModelRouter, ModelSpec, ProfileFragment, RiskProfile,
    RuleMerger, SourceTier, TaskType,
};

use crate::bridge::{BridgeOutcome, CacheCircuitBridge};
use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::credentials::CredentialPool;
use crate::providers::{ApiCredential, ProviderError, ProviderRegistry, ProviderRequest};
use crate::record::{FallbackLayer, FallbackRecord};
use crate::resilience::{CircuitBreaker, CircuitStatus};
use crate::store::SharedStore;

/// One resolution request.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Operation type; selects the cache namespace and TTL, and acts
    /// as the explicit complexity signal for routing.
    pub operation: TaskType,

    /// Query text, typically a company name or task description.
    pub query: String,

    /// Structured context forwarded to providers and mixed into the
    /// cache key.
    pub context: Option<JsonValue>,

    /// Previously known data, used as a low-trust merge fragment.
    pub prior: Option<RiskProfile>,
}

impl ResolveRequest {
    pub fn new(operation: TaskType, query: impl Into<String>) -> Self {
        Self {
            operation,
            query: query.into(),
            context: None,
            prior: None,
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_prior(mut self, prior: RiskProfile) -> Self {
        self.prior = Some(prior);
        self
    }
}

/// How the final answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    CacheHit,
    Fresh,
    Consensus,
    RuleMerged,
    /// Every provider path was blocked by an open circuit and the
    /// cache held nothing usable.
    CircuitOpenNoCache,
    Degraded,
}

/// The orchestrator's answer. Always present, possibly degraded.
#[derive(Debug)]
pub struct Resolution {
    pub profile: RiskProfile,
    pub outcome: OutcomeKind,
    pub layer: FallbackLayer,
    pub provenance: FallbackRecord,
}

/// What the walk observed, for choosing the layer-4 outcome kind.
#[derive(Debug, Default)]
struct WalkStats {
    cache_had_data: bool,
    circuit_blocked: u32,
    provider_attempts: u32,
}

impl WalkStats {
    fn account(&mut self, outcome: &BridgeOutcome) {
        match outcome {
            BridgeOutcome::CircuitOpenNoCache => self.circuit_blocked += 1,
            _ => self.provider_attempts += 1,
        }
    }
}

/// Result of one consensus merge.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub merged: RiskProfile,
    pub discrepancies: Vec<String>,
}

/// Domain-supplied consensus merge over multiple provider answers.
///
/// Implementations typically prompt a synthesis model with all source
/// payloads; they are injected because prompt content is domain logic
/// that does not belong in this layer.
#[async_trait]
pub trait ConsensusMerger: Send + Sync {
    async fn merge(
        &self,
        model: &ModelSpec,
        sources: &[ConsensusSource],
    ) -> Result<ConsensusOutcome, ProviderError>;
}

/// Credential availability for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialAvailability {
    pub available: usize,
    pub total: usize,
}

/// Operational health surface.
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub circuits: HashMap<String, CircuitStatus>,
    pub credentials: HashMap<String, CredentialAvailability>,
    pub cache_tier1_entries: u64,
}

/// Builder for [`FallbackOrchestrator`].
pub struct FallbackOrchestratorBuilder {
    config: RuntimeConfig,
    registry: ProviderRegistry,
    store: Option<Arc<dyn SharedStore>>,
    credentials: Vec<(String, Vec<ApiCredential>)>,
    merger: Option<Arc<dyn ConsensusMerger>>,
}

impl FallbackOrchestratorBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: ProviderRegistry::new(),
            store: None,
            credentials: Vec::new(),
            merger: None,
        }
    }

    /// Attach the shared store for cross-worker state.
    pub fn store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a provider client.
    pub fn provider(mut self, client: Arc<dyn crate::providers::ProviderClient>) -> Self {
        self.registry.register(client);
        self
    }

    /// Add rotating credentials for a provider.
    pub fn credentials(mut self, provider: impl Into<String>, secrets: Vec<ApiCredential>) -> Self {
        self.credentials.push((provider.into(), secrets));
        self
    }

    /// Install the synthesis-layer consensus merger.
    pub fn merger(mut self, merger: Arc<dyn ConsensusMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn build(self) -> FallbackOrchestrator {
        let mut breaker = CircuitBreaker::new(self.config.circuit.clone())
            .with_overrides(self.config.circuit_overrides.clone());
        let mut cache = ResponseCache::new(self.config.cache.clone());
        let pool = match &self.store {
            Some(store) => {
                breaker = breaker.with_store(store.clone());
                cache = cache.with_store(store.clone());
                CredentialPool::with_store(self.config.credential_cooldown, store.clone())
            }
            None => CredentialPool::new(self.config.credential_cooldown),
        };
        for (provider, secrets) in self.credentials {
            pool.add_provider(provider, secrets);
        }

        let cache = Arc::new(cache);
        let breaker = Arc::new(breaker);
        let bridge = CacheCircuitBridge::new(cache.clone(), breaker.clone())
            .count_cache_hits_as_success(self.config.count_cache_hit_as_success);

        FallbackOrchestrator {
            registry: Arc::new(self.registry),
            pool: Arc::new(pool),
            breaker,
            cache,
            bridge,
            router: ModelRouter::new(self.config.router.clone()),
            rule_merger: RuleMerger::new(self.config.ratio_tolerance),
            merger: self.merger,
            config: self.config,
        }
    }
}

/// Top-level coordinator for resilient provider access.
pub struct FallbackOrchestrator {
    registry: Arc<ProviderRegistry>,
    pool: Arc<CredentialPool>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ResponseCache>,
    bridge: CacheCircuitBridge,
    router: ModelRouter,
    rule_merger: RuleMerger,
    merger: Option<Arc<dyn ConsensusMerger>>,
    config: RuntimeConfig,
}

impl FallbackOrchestrator {
    pub fn builder(config: RuntimeConfig) -> FallbackOrchestratorBuilder {
        FallbackOrchestratorBuilder::new(config)
    }

    /// Resolve one request through the fallback layers.
    ///
    /// Never fails: the layer 0-3 walk runs inside the overall
    /// deadline, and when the walk is exhausted or the deadline fires
    /// mid-layer, the in-flight layer is abandoned and layer 4 returns
    /// an explicitly-flagged degraded profile.
    pub async fn resolve(&self, request: ResolveRequest) -> Resolution {
        let mut record = FallbackRecord::start();

        tracing::info!(
            request_id = %record.request_id,
            operation = ?request.operation,
            query = %request.query,
            "resolving"
        );

        // Material gathered along the way for layers 2-4.
        let mut sources: Vec<ConsensusSource> = Vec::new();
        let mut fragments: Vec<ProfileFragment> = Vec::new();
        if let Some(prior) = &request.prior {
            sources.push(ConsensusSource {
                provider: "prior".to_string(),
                payload: prior.clone(),
                confidence: ConfidenceTier::Low,
            });
            fragments.push(ProfileFragment::new(SourceTier::Prior, prior.clone()));
        }

        let mut stats = WalkStats::default();
        let walk = self.walk_layers(
            &request,
            &mut record,
            &mut sources,
            &mut fragments,
            &mut stats,
        );
        let timed_out = match timeout(self.config.overall_deadline, walk).await {
            Ok(Some((profile, outcome, layer))) => {
                record.complete();
                return Resolution {
                    profile,
                    outcome,
                    layer,
                    provenance: record,
                };
            }
            Ok(None) => false,
            Err(_) => true,
        };

        // Layer 4: graceful degradation. Never fails.
        let (reason, outcome) = if timed_out {
            ("overall deadline exceeded", OutcomeKind::Degraded)
        } else if stats.circuit_blocked > 0 && stats.provider_attempts == 0 && !stats.cache_had_data
        {
            // Open circuits blocked every provider path and the cache
            // held nothing. Surfaced as its own outcome kind so
            // callers can tell a cooldown window from exhaustion.
            ("circuit open, no cached data", OutcomeKind::CircuitOpenNoCache)
        } else {
            ("all fallback layers exhausted", OutcomeKind::Degraded)
        };
        let profile = self.degraded_profile(&request, &fragments, reason);
        record.attempt(FallbackLayer::Degraded, None, true, None, 0);
        record.complete();
        tracing::warn!(
            request_id = %record.request_id,
            reason = %reason,
            "returning degraded result"
        );
        Resolution {
            profile,
            outcome,
            layer: FallbackLayer::Degraded,
            provenance: record,
        }
    }

    /// Layers 0-3. Runs inside the overall-deadline timeout; `None`
    /// means every layer declined and layer 4 must answer.
    async fn walk_layers(
        &self,
        request: &ResolveRequest,
        record: &mut FallbackRecord,
        sources: &mut Vec<ConsensusSource>,
        fragments: &mut Vec<ProfileFragment>,
        stats: &mut WalkStats,
    ) -> Option<(RiskProfile, OutcomeKind, FallbackLayer)> {
        // Layer 0: cache.
        let started = Instant::now();
        let cached = self
            .cache
            .get(request.operation, &request.query, request.context.as_ref())
            .await;
        match cached {
            Some(profile) if profile.is_sufficient(self.config.min_extra_fields) => {
                record.attempt(
                    FallbackLayer::Cache,
                    None,
                    true,
                    None,
                    started.elapsed().as_millis() as u64,
                );
                return Some((profile, OutcomeKind::CacheHit, FallbackLayer::Cache));
            }
            Some(profile) => {
                // Usable as merge material, not as the answer.
                stats.cache_had_data = true;
                record.attempt(
                    FallbackLayer::Cache,
                    None,
                    false,
                    Some("cached profile insufficient".to_string()),
                    started.elapsed().as_millis() as u64,
                );
                fragments.push(ProfileFragment::new(SourceTier::CrossValidated, profile));
            }
            None => {
                record.attempt(
                    FallbackLayer::Cache,
                    None,
                    false,
                    None,
                    started.elapsed().as_millis() as u64,
                );
            }
        }

        // Layer 1: primary search, cross-checked by the validator.
        let sources_before = sources.len();
        if let Some(profile) = self
            .layer_search(request, record, sources, fragments, stats)
            .await
        {
            return Some((profile, OutcomeKind::Fresh, FallbackLayer::PrimarySearch));
        }

        // Layer 2: consensus synthesis, only over material layer 1
        // actually produced. A caller-supplied prior alone carries no
        // new information and goes straight to the rule merge.
        if sources.len() > sources_before {
            if let Some(profile) = self
                .layer_synthesis(request, record, sources, fragments, stats)
                .await
            {
                return Some((profile, OutcomeKind::Consensus, FallbackLayer::Synthesis));
            }
        }

        // Layer 3: deterministic rule merge of everything gathered.
        if !fragments.is_empty() {
            let started = Instant::now();
            let merged = self.rule_merger.merge(fragments.as_slice());
            if merged.has_required_fields() {
                record.attempt(
                    FallbackLayer::RuleMerge,
                    None,
                    true,
                    None,
                    started.elapsed().as_millis() as u64,
                );
                self.cache
                    .set(request.operation, &request.query, request.context.as_ref(), &merged, None)
                    .await;
                return Some((merged, OutcomeKind::RuleMerged, FallbackLayer::RuleMerge));
            }
            record.attempt(
                FallbackLayer::RuleMerge,
                None,
                false,
                Some("merged profile lacks required fields".to_string()),
                started.elapsed().as_millis() as u64,
            );
        }
        None
    }

    /// Resolve many requests with bounded concurrency.
    ///
    /// Individual outcomes are collected independently; one item's
    /// degradation never cancels its siblings.
    pub async fn resolve_batch(&self, requests: Vec<ResolveRequest>) -> Vec<Resolution> {
        let limiter = Arc::new(Semaphore::new(self.config.batch_concurrency));
        let tasks = requests.into_iter().map(|request| {
            let limiter = limiter.clone();
            async move {
                let _permit = limiter.acquire().await.ok();
                self.resolve(request).await
            }
        });
        join_all(tasks).await
    }

    /// Operational snapshot: circuits, credentials, cache occupancy.
    pub async fn health(&self) -> HealthSnapshot {
        let mut circuits = HashMap::new();
        let mut credentials = HashMap::new();
        for name in self.registry.names() {
            circuits.insert(name.to_string(), self.breaker.status(name));
        }
        for provider in self.pool.providers() {
            let (available, total) = self.pool.availability(&provider);
            credentials.insert(provider, CredentialAvailability { available, total });
        }
        HealthSnapshot {
            circuits,
            credentials,
            cache_tier1_entries: self.cache.tier1_entries().await,
        }
    }

    /// Layer 1: search provider, then validator enrichment.
    ///
    /// Returns the final profile if the (possibly enriched) search
    /// result is sufficient; otherwise stashes whatever was gathered
    /// and yields to the next layer.
    async fn layer_search(
        &self,
        request: &ResolveRequest,
        record: &mut FallbackRecord,
        sources: &mut Vec<ConsensusSource>,
        fragments: &mut Vec<ProfileFragment>,
        stats: &mut WalkStats,
    ) -> Option<RiskProfile> {
        let roles = &self.config.roles;

        let result = self
            .bridge
            .call_protected(
                request.operation,
                &roles.search,
                &request.query,
                request.context.as_ref(),
                || self.provider_call(&roles.search, &roles.search_model, &request.query, request.context.clone()),
            )
            .await;
        stats.account(&result.outcome);
        record.attempt(
            FallbackLayer::PrimarySearch,
            Some(&roles.search),
            result.profile.is_some(),
            bridge_error(&result.outcome),
            result.elapsed_ms,
        );

        let search_profile = result.profile?;
        sources.push(ConsensusSource {
            provider: roles.search.clone(),
            payload: search_profile.clone(),
            confidence: ConfidenceTier::High,
        });
        fragments.push(ProfileFragment::new(
            SourceTier::Verified,
            search_profile.clone(),
        ));

        // Validator pass: cross-check and enrich the search result.
        let validator_context = serde_json::to_value(&search_profile).ok();
        let result = self
            .bridge
            .call_protected(
                TaskType::Validation,
                &roles.validator,
                &request.query,
                validator_context.as_ref(),
                || {
                    self.provider_call(
                        &roles.validator,
                        &roles.validator_model,
                        &request.query,
                        validator_context.clone(),
                    )
                },
            )
            .await;
        stats.account(&result.outcome);
        record.attempt(
            FallbackLayer::PrimarySearch,
            Some(&roles.validator),
            result.profile.is_some(),
            bridge_error(&result.outcome),
            result.elapsed_ms,
        );

        let mut candidate = search_profile;
        if let Some(validated) = result.profile {
            sources.push(ConsensusSource {
                provider: roles.validator.clone(),
                payload: validated.clone(),
                confidence: ConfidenceTier::Medium,
            });
            fragments.push(ProfileFragment::new(
                SourceTier::CrossValidated,
                validated.clone(),
            ));
            candidate.fill_from(&validated);
        }

        if candidate.is_sufficient(self.config.min_extra_fields) {
            self.cache
                .set(
                    request.operation,
                    &request.query,
                    request.context.as_ref(),
                    &candidate,
                    None,
                )
                .await;
            Some(candidate)
        } else {
            None
        }
    }

    /// Layer 2: walk the routed synthesis models until one merge
    /// produces a sufficient consensus.
    async fn layer_synthesis(
        &self,
        request: &ResolveRequest,
        record: &mut FallbackRecord,
        sources: &[ConsensusSource],
        fragments: &mut Vec<ProfileFragment>,
        stats: &mut WalkStats,
    ) -> Option<RiskProfile> {
        let merger = self.merger.as_ref()?;

        let complexity = self
            .router
            .classify(&request.query, None, Some(request.operation));
        for model in self.router.models_for(complexity) {
            let started = Instant::now();

            self.breaker.sync_from_store(&model.provider).await;
            if !self.breaker.is_available(&model.provider) {
                stats.circuit_blocked += 1;
                record.attempt(
                    FallbackLayer::Synthesis,
                    Some(&model.provider),
                    false,
                    Some("circuit open".to_string()),
                    started.elapsed().as_millis() as u64,
                );
                continue;
            }

            stats.provider_attempts += 1;
            match merger.merge(&model, sources).await {
                Ok(outcome) => {
                    self.breaker.record_success(&model.provider).await;
                    record.attempt(
                        FallbackLayer::Synthesis,
                        Some(&model.provider),
                        true,
                        None,
                        started.elapsed().as_millis() as u64,
                    );
                    if !outcome.discrepancies.is_empty() {
                        tracing::warn!(
                            request_id = %record.request_id,
                            discrepancies = ?outcome.discrepancies,
                            "consensus merge flagged discrepancies"
                        );
                    }
                    if outcome.merged.is_sufficient(self.config.min_extra_fields) {
                        self.cache
                            .set(
                                request.operation,
                                &request.query,
                                request.context.as_ref(),
                                &outcome.merged,
                                None,
                            )
                            .await;
                        return Some(outcome.merged);
                    }
                    // Insufficient consensus still feeds the rule merge.
                    fragments.push(ProfileFragment::new(SourceTier::Inferred, outcome.merged));
                    return None;
                }
                Err(e) => {
                    self.breaker.record_failure(&model.provider, &e.to_string()).await;
                    record.attempt(
                        FallbackLayer::Synthesis,
                        Some(&model.provider),
                        false,
                        Some(e.to_string()),
                        started.elapsed().as_millis() as u64,
                    );
                }
            }
        }
        None
    }

    /// One circuit-agnostic provider call: registry lookup, credential
    /// rotation, bounded retry, and credential outcome bookkeeping.
    async fn provider_call(
        &self,
        provider_id: &str,
        model: &str,
        query: &str,
        context: Option<JsonValue>,
    ) -> Result<RiskProfile, ProviderError> {
        let client = self.registry.get(provider_id)?;
        let credential = self.pool.next_credential(provider_id).await;

        let mut call = ProviderRequest::new(query, model);
        call.context = context;
        call.timeout = self.config.call_timeout;
        call.credential = credential.as_ref().map(|c| c.secret.clone());

        let result = self
            .config
            .retry
            .run(provider_id, || client.call(&call))
            .await;

        match &result {
            Ok(_) => {
                if let Some(credential) = &credential {
                    self.pool.mark_succeeded(provider_id, credential).await;
                }
            }
            Err(e) => {
                if let Some(credential) = &credential {
                    tracing::warn!(provider = %provider_id, error = %e, "call failed, cooling credential");
                    self.pool.mark_failed(provider_id, credential).await;
                }
            }
        }
        result.map(|response| response.profile)
    }

    /// Layer 4: the minimal flagged answer. Whatever partial data the
    /// walk gathered is merged in, but nothing here can fail.
    fn degraded_profile(
        &self,
        request: &ResolveRequest,
        fragments: &[ProfileFragment],
        reason: &str,
    ) -> RiskProfile {
        let mut profile = if fragments.is_empty() {
            RiskProfile::default()
        } else {
            self.rule_merger.merge(fragments)
        };
        if profile.company_name.as_deref().map_or(true, str::is_empty) {
            profile.company_name = Some(request.query.clone());
        }
        profile.degraded = true;
        profile.degraded_reason = Some(reason.to_string());
        profile
    }
}

fn bridge_error(outcome: &BridgeOutcome) -> Option<String> {
    match outcome {
        BridgeOutcome::CacheHit | BridgeOutcome::Fresh => None,
        BridgeOutcome::CircuitOpenNoCache => Some("circuit open, no cached data".to_string()),
        BridgeOutcome::CallFailed(message) => Some(message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderClient, ProviderResponse};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StubProvider {
        name: String,
        calls: AtomicU32,
        delay: Duration,
        response: Box<dyn Fn() -> Result<RiskProfile, ProviderError> + Send + Sync>,
    }

    impl StubProvider {
        fn ok(name: &str, profile: RiskProfile) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                response: Box::new(move || Ok(profile.clone())),
            })
        }

        fn slow(name: &str, profile: RiskProfile, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicU32::new(0),
                delay,
                response: Box::new(move || Ok(profile.clone())),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                response: Box::new(|| {
                    Err(ProviderError::Api {
                        status: 400,
                        message: "rejected".into(),
                    })
                }),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        async fn call(
            &self,
            request: &ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.response)().map(|profile| ProviderResponse {
                profile,
                raw_content: String::new(),
                model: request.model.clone(),
                confidence: ConfidenceTier::High,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct StubMerger {
        result: Option<RiskProfile>,
        calls: AtomicU32,
    }

    impl StubMerger {
        fn with_result(profile: RiskProfile) -> Arc<Self> {
            Arc::new(Self {
                result: Some(profile),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConsensusMerger for StubMerger {
        async fn merge(
            &self,
            _model: &ModelSpec,
            _sources: &[ConsensusSource],
        ) -> Result<ConsensusOutcome, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Some(profile) => Ok(ConsensusOutcome {
                    merged: profile.clone(),
                    discrepancies: vec![],
                }),
                None => Err(ProviderError::Timeout(Duration::from_secs(1))),
            }
        }
    }

    fn rich_profile(name: &str) -> RiskProfile {
        RiskProfile {
            company_name: Some(name.to_string()),
            registration_country: Some("DE".to_string()),
            industry: Some("manufacturing".to_string()),
            risk_score: Some(42.0),
            ..RiskProfile::default()
        }
    }

    fn fast_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.retry.max_attempts = 1;
        config.retry.min_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let search = StubProvider::ok("perplexity", rich_profile("Acme"));
        let validator = StubProvider::ok("deepseek", rich_profile("Acme"));
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search.clone())
            .provider(validator.clone())
            .build();

        orchestrator
            .cache
            .set(TaskType::CompanyLookup, "acme", None, &rich_profile("Acme"), None)
            .await;

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::CacheHit);
        assert_eq!(resolution.layer, FallbackLayer::Cache);
        assert_eq!(resolution.provenance.attempts.len(), 1);
        assert_eq!(search.calls(), 0);
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_search_path() {
        let search = StubProvider::ok("perplexity", rich_profile("Acme"));
        let validator = StubProvider::ok("deepseek", rich_profile("Acme"));
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search.clone())
            .provider(validator.clone())
            .build();

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::Fresh);
        assert_eq!(resolution.layer, FallbackLayer::PrimarySearch);
        assert_eq!(search.calls(), 1);
        assert_eq!(validator.calls(), 1);
        assert_eq!(
            resolution.profile.company_name.as_deref(),
            Some("Acme")
        );
    }

    #[tokio::test]
    async fn test_validator_failure_does_not_block_sufficient_search() {
        let search = StubProvider::ok("perplexity", rich_profile("Acme"));
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .build();

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::Fresh);
    }

    #[tokio::test]
    async fn test_consensus_path() {
        // Search yields a bare name; synthesis completes the picture.
        let search = StubProvider::ok("perplexity", RiskProfile::named("Acme"));
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .merger(StubMerger::with_result(rich_profile("Acme")))
            .build();

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::Consensus);
        assert_eq!(resolution.layer, FallbackLayer::Synthesis);
    }

    #[tokio::test]
    async fn test_rule_merge_path() {
        // No merger configured; search gives partial data only.
        let search = StubProvider::ok("perplexity", RiskProfile::named("Acme"));
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .build();

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::RuleMerged);
        assert_eq!(
            resolution.profile.company_name.as_deref(),
            Some("Acme")
        );
    }

    #[tokio::test]
    async fn test_degradation_never_fails() {
        let search = StubProvider::failing("perplexity");
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .build();

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::RiskAssessment, "Acme Corp"))
            .await;

        assert_eq!(resolution.outcome, OutcomeKind::Degraded);
        assert!(resolution.profile.degraded);
        assert!(resolution.profile.degraded_reason.is_some());
        assert_eq!(
            resolution.profile.company_name.as_deref(),
            Some("Acme Corp")
        );
        assert_eq!(
            resolution.provenance.winning_layer(),
            Some(FallbackLayer::Degraded)
        );
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    #[tokio::test]
    async fn test_circuit_opens_and_provenance_records_it() {
        init_tracing();
        let search = StubProvider::failing("perplexity");
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search.clone())
            .provider(validator)
            .build();

        // Default threshold is 3 consecutive failures.
        for i in 0..3 {
            let query = format!("company {i}");
            orchestrator
                .resolve(ResolveRequest::new(TaskType::CompanyLookup, query))
                .await;
        }
        let health = orchestrator.health().await;
        let circuit = &health.circuits["perplexity"];
        assert_eq!(circuit.state, crate::resilience::CircuitStateKind::Open);
        assert!(circuit.cooldown_remaining_secs > 0);

        // Next resolution fails fast without touching the provider.
        let before = search.calls();
        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "company 99"))
            .await;
        assert_eq!(search.calls(), before);
        assert_eq!(resolution.outcome, OutcomeKind::CircuitOpenNoCache);
        assert!(resolution.profile.degraded);
        assert_eq!(
            resolution.profile.degraded_reason.as_deref(),
            Some("circuit open, no cached data")
        );
        assert!(resolution.provenance.attempts.iter().any(|a| {
            a.error.as_deref() == Some("circuit open, no cached data")
        }));
    }

    #[tokio::test]
    async fn test_open_circuit_with_cached_data_still_degrades_normally() {
        // Partial cached data means the window is not "no cache": the
        // rule merge answers instead of the open-circuit outcome.
        let search = StubProvider::failing("perplexity");
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .build();

        for i in 0..3 {
            orchestrator
                .resolve(ResolveRequest::new(
                    TaskType::CompanyLookup,
                    format!("company {i}"),
                ))
                .await;
        }
        orchestrator
            .cache
            .set(
                TaskType::CompanyLookup,
                "acme",
                None,
                &RiskProfile::named("Acme"),
                None,
            )
            .await;

        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;
        assert_eq!(resolution.outcome, OutcomeKind::RuleMerged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_aborts_inflight_layer() {
        // The search call alone would take 2s against a 200ms budget;
        // the walk must be cut off and layer 4 must answer.
        let search = StubProvider::slow("perplexity", rich_profile("Acme"), Duration::from_secs(2));
        let validator = StubProvider::ok("deepseek", rich_profile("Acme"));
        let mut config = fast_config();
        config.overall_deadline = Duration::from_millis(200);
        let orchestrator = FallbackOrchestrator::builder(config)
            .provider(search.clone())
            .provider(validator.clone())
            .build();

        let started = Instant::now();
        let resolution = orchestrator
            .resolve(ResolveRequest::new(TaskType::CompanyLookup, "acme"))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(resolution.outcome, OutcomeKind::Degraded);
        assert!(resolution.profile.degraded);
        assert_eq!(
            resolution.profile.degraded_reason.as_deref(),
            Some("overall deadline exceeded")
        );
        assert_eq!(search.calls(), 1);
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_prior_alone_skips_synthesis() {
        // Nothing fresh comes out of layer 1, so synthesis over the
        // caller's prior alone is pointless: the rule merge uses it
        // directly and the merger is never consulted.
        let search = StubProvider::failing("perplexity");
        let validator = StubProvider::failing("deepseek");
        let merger = StubMerger::with_result(rich_profile("Acme"));
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .merger(merger.clone())
            .build();

        let resolution = orchestrator
            .resolve(
                ResolveRequest::new(TaskType::CompanyLookup, "acme")
                    .with_prior(RiskProfile::named("Acme")),
            )
            .await;

        assert_eq!(merger.calls(), 0);
        assert_eq!(resolution.outcome, OutcomeKind::RuleMerged);
        assert_eq!(resolution.profile.company_name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn test_batch_collects_all_outcomes() {
        let search = StubProvider::ok("perplexity", rich_profile("Acme"));
        let validator = StubProvider::failing("deepseek");
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .provider(validator)
            .build();

        let requests = (0..8)
            .map(|i| ResolveRequest::new(TaskType::CompanyLookup, format!("company {i}")))
            .collect();
        let resolutions = orchestrator.resolve_batch(requests).await;

        assert_eq!(resolutions.len(), 8);
        for resolution in resolutions {
            assert_eq!(resolution.outcome, OutcomeKind::Fresh);
        }
    }

    #[tokio::test]
    async fn test_health_snapshot() {
        let search = StubProvider::ok("perplexity", rich_profile("Acme"));
        let orchestrator = FallbackOrchestrator::builder(fast_config())
            .provider(search)
            .credentials(
                "perplexity",
                vec![
                    ApiCredential::new(
                        "pplx-key-1",
                        crate::providers::CredentialSource::Programmatic,
                        "primary",
                    ),
                    ApiCredential::new(
                        "pplx-key-2",
                        crate::providers::CredentialSource::Programmatic,
                        "backup",
                    ),
                ],
            )
            .build();

        let health = orchestrator.health().await;
        assert!(health.circuits.contains_key("perplexity"));
        let avail = &health.credentials["perplexity"];
        assert_eq!(avail.total, 2);
        assert_eq!(avail.available, 2);
    }
}
