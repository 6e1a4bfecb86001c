//! # vantage-runtime
//!
//! Resilience and orchestration for unreliable AI-inference providers.
//!
//! This crate mediates every provider call made on behalf of the
//! risk-analysis pipeline. A caller always receives *some* usable
//! answer: from a fresh call, a cache, a cheaper synthesis path, a
//! deterministic rule merge, or a clearly-flagged degraded result.
//! Never an unhandled failure, never an unbounded wait.
//!
//! ## Building Blocks
//!
//! - [`CredentialPool`]: rotates API credentials, cools failed ones
//! - [`CircuitBreaker`]: per-provider failure state machine
//! - [`ResponseCache`]: two-tier (local + shared) response cache
//! - [`CacheCircuitBridge`]: serves cached data even while circuits are open
//! - [`FallbackOrchestrator`]: walks the five fallback layers
//!
//! Deterministic pieces (profile model, rule merge, model router) live
//! in `vantage-core`; this crate owns everything async and fallible.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vantage_core::TaskType;
//! use vantage_runtime::{
//!     FallbackOrchestrator, ResolveRequest, RuntimeConfig,
//! };
//!
//! let orchestrator = FallbackOrchestrator::builder(RuntimeConfig::default())
//!     .provider(search_client)
//!     .provider(validator_client)
//!     .store(redis_store)
//!     .build();
//!
//! let resolution = orchestrator
//!     .resolve(ResolveRequest::new(TaskType::CompanyLookup, "Acme Corp"))
//!     .await;
//! println!("{:?} via layer {:?}", resolution.outcome, resolution.layer);
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod orchestrator;
pub mod providers;
pub mod record;
pub mod resilience;
pub mod store;

pub use bridge::{BridgeOutcome, BridgeResult, CacheCircuitBridge};
pub use cache::{CacheConfig, CacheKey, ResponseCache};
pub use config::{ProviderRoles, RuntimeConfig};
pub use credentials::{CredentialPool, PoolCredential, DEFAULT_CREDENTIAL_COOLDOWN};
pub use orchestrator::{
    ConsensusMerger, ConsensusOutcome, FallbackOrchestrator, FallbackOrchestratorBuilder,
    HealthSnapshot, OutcomeKind, Resolution, ResolveRequest,
};
pub use providers::{
    ApiCredential, CredentialSource, ProviderClient, ProviderError, ProviderRegistry,
    ProviderRequest, ProviderResponse,
};
pub use record::{FallbackLayer, FallbackRecord, LayerAttempt};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus, RetryPolicy};
pub use store::{MemoryStore, SharedStore, StoreError};
