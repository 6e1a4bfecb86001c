//! Provider client abstractions.
//!
//! One [`ProviderClient`] per external AI-inference provider is
//! injected into the orchestrator at startup. The error taxonomy drives
//! all retry and fallback branching: transient errors are retried with
//! backoff, hard errors abort retries and move to the next option.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling;
//! secrets never reach logs or the shared store in cleartext.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use vantage_core::{ConfidenceTier, RiskProfile};

pub mod registry;
pub mod secrets;

#[cfg(feature = "http-providers")]
pub mod http;

pub use registry::ProviderRegistry;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "http-providers")]
pub use http::OpenAiCompatProvider;

/// Errors from provider clients.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a retry with backoff is worth attempting.
    ///
    /// Auth and malformed-request failures stay broken no matter how
    /// often they are retried; timeouts, rate limits, transport errors
    /// and server-side 5xx are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Auth
            | ProviderError::MalformedResponse(_)
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// A single provider call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The query text (typically a company name or task description).
    pub query: String,

    /// Structured context forwarded with the query.
    pub context: Option<JsonValue>,

    /// Model identifier to use.
    pub model: String,

    /// Per-call timeout.
    pub timeout: Duration,

    /// Credential selected by the pool for this call; clients with
    /// their own fixed credential ignore this.
    pub credential: Option<ApiCredential>,
}

impl ProviderRequest {
    /// Build a request with the default per-call timeout.
    pub fn new(query: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
            model: model.into(),
            timeout: Duration::from_secs(30),
            credential: None,
        }
    }
}

/// A provider's answer.
///
/// A partially-populated profile is a valid response: missing fields
/// are a data-quality concern for later layers, not a call failure.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Structured payload extracted from the provider output.
    pub profile: RiskProfile,

    /// Raw text the provider returned, kept for audit.
    pub raw_content: String,

    /// Model that actually served the call.
    pub model: String,

    /// Confidence the provider (or adapter) declares for this payload.
    pub confidence: ConfidenceTier,
}

/// Provider abstraction allows swapping inference backends.
///
/// Implementations make the network call and translate transport and
/// API failures into the [`ProviderError`] taxonomy. They do not retry,
/// cache, or track circuit state; that is the runtime's job.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Execute one call.
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Check if the provider looks usable.
    async fn health_check(&self) -> bool;

    /// Provider id for registry lookup, circuit keys, and logs.
    fn name(&self) -> &str;
}
