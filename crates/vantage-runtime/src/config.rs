//! Runtime configuration.
//!
//! Everything the orchestrator needs to run is gathered here and is
//! serde-loadable from JSON. Durations accept human-readable strings
//! ("90s", "5m", "2h") and serialize back the same way.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

use vantage_core::router::RouterConfig;

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Human-readable duration fields ("300ms", "90s", "5m").
pub(crate) mod duration_human {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Which provider fills which role in the fallback walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRoles {
    /// Layer 1 primary search provider.
    pub search: String,
    /// Model the search provider is asked with.
    pub search_model: String,
    /// Layer 1 validator provider.
    pub validator: String,
    /// Model the validator provider is asked with.
    pub validator_model: String,
}

impl Default for ProviderRoles {
    fn default() -> Self {
        Self {
            search: "perplexity".to_string(),
            search_model: "sonar-pro".to_string(),
            validator: "deepseek".to_string(),
            validator_model: "deepseek-chat".to_string(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub roles: ProviderRoles,

    /// Synthesis-tier routing (layer 2 walks these models in order).
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub circuit: CircuitBreakerConfig,

    /// Per-provider circuit overrides, keyed by provider id.
    #[serde(default)]
    pub circuit_overrides: HashMap<String, CircuitBreakerConfig>,

    /// Cooldown applied to a credential after a failed call.
    #[serde(with = "duration_human", default = "default_credential_cooldown")]
    pub credential_cooldown: Duration,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Hard deadline for one resolution across all layers.
    #[serde(with = "duration_human", default = "default_overall_deadline")]
    pub overall_deadline: Duration,

    /// Per-provider-call timeout.
    #[serde(with = "duration_human", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Concurrent item cap for batch resolution.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Populated fields beyond company_name required for sufficiency.
    #[serde(default = "default_min_extra_fields")]
    pub min_extra_fields: usize,

    /// Allowed drift before export/domestic ratios are rescaled.
    #[serde(default = "default_ratio_tolerance")]
    pub ratio_tolerance: f64,

    /// Whether a cache hit counts as a circuit success.
    #[serde(default)]
    pub count_cache_hit_as_success: bool,
}

fn default_credential_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_overall_deadline() -> Duration {
    Duration::from_secs(90)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_concurrency() -> usize {
    5
}

fn default_min_extra_fields() -> usize {
    2
}

fn default_ratio_tolerance() -> f64 {
    vantage_core::merge::DEFAULT_RATIO_TOLERANCE
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            roles: ProviderRoles::default(),
            router: RouterConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            circuit_overrides: HashMap::new(),
            credential_cooldown: default_credential_cooldown(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            overall_deadline: default_overall_deadline(),
            call_timeout: default_call_timeout(),
            batch_concurrency: default_batch_concurrency(),
            min_extra_fields: default_min_extra_fields(),
            ratio_tolerance: default_ratio_tolerance(),
            count_cache_hit_as_success: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.cooldown, Duration::from_secs(60));
        assert_eq!(config.credential_cooldown, Duration::from_secs(300));
        assert_eq!(config.overall_deadline, Duration::from_secs(90));
        assert_eq!(config.batch_concurrency, 5);
        assert_eq!(config.min_extra_fields, 2);
        assert!(!config.count_cache_hit_as_success);
    }

    #[test]
    fn test_human_durations_round_trip() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"1m 30s\"") || json.contains("\"90s\""));

        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.overall_deadline, Duration::from_secs(90));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"overall_deadline": "2m", "roles": {
                "search": "perplexity", "search_model": "sonar",
                "validator": "deepseek", "validator_model": "deepseek-chat"
            }}"#,
        )
        .unwrap();
        assert_eq!(config.overall_deadline, Duration::from_secs(120));
        assert_eq!(config.batch_concurrency, 5);
    }
}
