//! Two-tier response cache.
//!
//! Tier 1 is a bounded in-process LRU (one per operation type,
//! sub-millisecond, not shared). Tier 2 is the shared store, with a
//! per-operation TTL chosen by how volatile the underlying fact is:
//! registry facts keep for a month, news results for an hour.
//!
//! Keys normalize the query text and canonicalize the context JSON so
//! that identical logical requests collide regardless of incidental
//! formatting differences.
//!
//! There is no cross-process single-flight lock: two concurrent
//! identical misses may each issue their own upstream call.

use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use vantage_core::{RiskProfile, TaskType};

use crate::store::SharedStore;

const KEY_HASH_LEN: usize = 16;

/// Cache tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries per operation type in the process-local tier.
    pub tier1_capacity: u64,

    /// Per-operation TTL overrides (seconds). Unlisted operations use
    /// the built-in defaults.
    #[serde(default)]
    pub ttl_overrides_secs: HashMap<TaskType, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tier1_capacity: 1024,
            ttl_overrides_secs: HashMap::new(),
        }
    }
}

/// Built-in TTL per operation, by fact volatility.
fn default_ttl(operation: TaskType) -> Duration {
    match operation {
        TaskType::RegistryCheck => Duration::from_secs(30 * 24 * 3600),
        TaskType::CompanyLookup => Duration::from_secs(7 * 24 * 3600),
        TaskType::RiskAssessment => Duration::from_secs(24 * 3600),
        TaskType::Validation => Duration::from_secs(24 * 3600),
        TaskType::NewsScan => Duration::from_secs(3600),
    }
}

fn operation_slug(operation: TaskType) -> &'static str {
    match operation {
        TaskType::CompanyLookup => "company_lookup",
        TaskType::RiskAssessment => "risk_assessment",
        TaskType::RegistryCheck => "registry_check",
        TaskType::NewsScan => "news_scan",
        TaskType::Validation => "validation",
    }
}

/// Composite cache key: operation + query hash + context hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: TaskType, query: &str, context: Option<&JsonValue>) -> Self {
        let qhash = short_hash(&normalize_query(query));
        let chash = short_hash(&canonical_json(context));
        Self(format!("{}:{}:{}", operation_slug(operation), qhash, chash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn store_key(&self) -> String {
        format!("vantage:cache:{}", self.0)
    }
}

fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic serialization: object keys sorted recursively.
fn canonical_json(value: Option<&JsonValue>) -> String {
    fn walk(value: &JsonValue, out: &mut String) {
        match value {
            JsonValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(k).unwrap_or_default());
                    out.push(':');
                    walk(&map[*k], out);
                }
                out.push('}');
            }
            JsonValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    walk(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    match value {
        None => String::new(),
        Some(v) => {
            let mut out = String::new();
            walk(v, &mut out);
            out
        }
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(KEY_HASH_LEN);
    for byte in digest.iter().take(KEY_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Tier-1 entry. Expiry is tracked explicitly so the cache clock
/// follows tokio time rather than moka's internal wall clock.
#[derive(Clone)]
struct CachedEntry {
    profile: RiskProfile,
    expires_at: Instant,
}

/// Tier-2 payload. Carries its own freshness window so a promote can
/// re-arm tier 1 with the remaining lifetime only.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    profile: RiskProfile,
    stored_at_ms: i64,
    ttl_secs: u64,
}

/// Two-tier response cache.
pub struct ResponseCache {
    tier1: HashMap<TaskType, MokaCache<String, CachedEntry>>,
    store: Option<Arc<dyn SharedStore>>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let operations = [
            TaskType::CompanyLookup,
            TaskType::RiskAssessment,
            TaskType::RegistryCheck,
            TaskType::NewsScan,
            TaskType::Validation,
        ];
        let tier1 = operations
            .into_iter()
            .map(|op| {
                (
                    op,
                    MokaCache::builder()
                        .max_capacity(config.tier1_capacity)
                        .build(),
                )
            })
            .collect();
        Self {
            tier1,
            store: None,
            config,
        }
    }

    /// Attach the shared tier-2 store.
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Effective TTL for an operation.
    pub fn ttl_for(&self, operation: TaskType) -> Duration {
        self.config
            .ttl_overrides_secs
            .get(&operation)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| default_ttl(operation))
    }

    /// Look up a cached profile. Tier 1 first; a tier-2 hit is promoted
    /// into tier 1 before returning. Expired entries are never returned.
    pub async fn get(
        &self,
        operation: TaskType,
        query: &str,
        context: Option<&JsonValue>,
    ) -> Option<RiskProfile> {
        let key = CacheKey::new(operation, query, context);
        let local = &self.tier1[&operation];

        if let Some(entry) = local.get(key.as_str()).await {
            if entry.expires_at > Instant::now() {
                tracing::debug!(key = %key.as_str(), "cache hit (local)");
                return Some(entry.profile);
            }
            local.invalidate(key.as_str()).await;
        }

        let store = self.store.as_ref()?;
        let raw = match store.get(&key.store_key()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "shared cache unreachable, treating as miss");
                return None;
            }
        };

        let stored: StoredEntry = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, key = %key.as_str(), "corrupt cache payload dropped");
                let _ = store.delete(&key.store_key()).await;
                return None;
            }
        };

        let age_ms = (chrono::Utc::now().timestamp_millis() - stored.stored_at_ms).max(0) as u64;
        let remaining = Duration::from_secs(stored.ttl_secs).saturating_sub(Duration::from_millis(age_ms));
        if remaining.is_zero() {
            return None;
        }

        tracing::debug!(key = %key.as_str(), "cache hit (shared), promoting");
        local
            .insert(
                key.as_str().to_string(),
                CachedEntry {
                    profile: stored.profile.clone(),
                    expires_at: Instant::now() + remaining,
                },
            )
            .await;
        Some(stored.profile)
    }

    /// Store a profile in both tiers. Tier 1 always succeeds; a tier-2
    /// write failure is logged and swallowed.
    pub async fn set(
        &self,
        operation: TaskType,
        query: &str,
        context: Option<&JsonValue>,
        profile: &RiskProfile,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(operation));
        let key = CacheKey::new(operation, query, context);

        self.tier1[&operation]
            .insert(
                key.as_str().to_string(),
                CachedEntry {
                    profile: profile.clone(),
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;

        let Some(store) = &self.store else { return };
        let stored = StoredEntry {
            profile: profile.clone(),
            stored_at_ms: chrono::Utc::now().timestamp_millis(),
            ttl_secs: ttl.as_secs(),
        };
        let payload = match serde_json::to_string(&stored) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "cache payload serialization failed");
                return;
            }
        };
        if let Err(e) = store.set(&key.store_key(), &payload, Some(ttl)).await {
            tracing::warn!(error = %e, "shared cache write failed, local tier kept");
        }
    }

    /// Drop one entry from both tiers.
    pub async fn invalidate(&self, operation: TaskType, query: &str, context: Option<&JsonValue>) {
        let key = CacheKey::new(operation, query, context);
        self.tier1[&operation].invalidate(key.as_str()).await;
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&key.store_key()).await {
                tracing::warn!(error = %e, "shared cache invalidation failed");
            }
        }
    }

    /// Drop every entry for an operation from both tiers.
    pub async fn invalidate_operation(&self, operation: TaskType) {
        self.tier1[&operation].invalidate_all();
        if let Some(store) = &self.store {
            let prefix = format!("vantage:cache:{}:", operation_slug(operation));
            match store.delete_prefix(&prefix).await {
                Ok(n) => tracing::info!(operation = operation_slug(operation), removed = n, "cache cleared"),
                Err(e) => tracing::warn!(error = %e, "shared cache clear failed"),
            }
        }
    }

    /// Approximate tier-1 entry count across all operations.
    pub async fn tier1_entries(&self) -> u64 {
        let mut total = 0;
        for cache in self.tier1.values() {
            cache.run_pending_tasks().await;
            total += cache.entry_count();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UnreachableStore};
    use serde_json::json;

    fn profile(name: &str) -> RiskProfile {
        RiskProfile::named(name)
    }

    #[tokio::test]
    async fn test_round_trip_local_only() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache
            .set(TaskType::CompanyLookup, "Acme Corp", None, &profile("Acme Corp"), None)
            .await;

        let hit = cache.get(TaskType::CompanyLookup, "Acme Corp", None).await;
        assert_eq!(hit.unwrap().company_name.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(CacheConfig::default()).with_store(store);

        cache
            .set(
                TaskType::NewsScan,
                "acme news",
                None,
                &profile("Acme"),
                Some(Duration::from_secs(60)),
            )
            .await;

        assert!(cache.get(TaskType::NewsScan, "acme news", None).await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(TaskType::NewsScan, "acme news", None).await.is_none());
    }

    #[tokio::test]
    async fn test_key_normalization() {
        let a = CacheKey::new(
            TaskType::CompanyLookup,
            "Acme Corp",
            Some(&json!({"a": 1, "b": 2})),
        );
        let b = CacheKey::new(
            TaskType::CompanyLookup,
            "  acme   corp ",
            Some(&json!({"b": 2, "a": 1})),
        );
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_operations_do_not_collide() {
        let a = CacheKey::new(TaskType::CompanyLookup, "acme", None);
        let b = CacheKey::new(TaskType::NewsScan, "acme", None);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_tier2_promotion() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());

        // Writer and reader share tier 2 but not tier 1.
        let writer = ResponseCache::new(CacheConfig::default()).with_store(store.clone());
        let reader = ResponseCache::new(CacheConfig::default()).with_store(store.clone());

        writer
            .set(TaskType::RegistryCheck, "acme", None, &profile("Acme"), None)
            .await;

        assert_eq!(reader.tier1_entries().await, 0);
        let hit = reader.get(TaskType::RegistryCheck, "acme", None).await;
        assert!(hit.is_some());
        assert_eq!(reader.tier1_entries().await, 1);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_local() {
        let store: Arc<dyn SharedStore> = Arc::new(UnreachableStore);
        let cache = ResponseCache::new(CacheConfig::default()).with_store(store);

        cache
            .set(TaskType::Validation, "acme", None, &profile("Acme"), None)
            .await;

        // Tier-2 writes failed silently; tier 1 still serves.
        assert!(cache.get(TaskType::Validation, "acme", None).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_operation() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(CacheConfig::default()).with_store(store);

        cache
            .set(TaskType::NewsScan, "acme", None, &profile("Acme"), None)
            .await;
        cache
            .set(TaskType::CompanyLookup, "acme", None, &profile("Acme"), None)
            .await;

        cache.invalidate_operation(TaskType::NewsScan).await;

        assert!(cache.get(TaskType::NewsScan, "acme", None).await.is_none());
        assert!(cache.get(TaskType::CompanyLookup, "acme", None).await.is_some());
    }

    proptest::proptest! {
        /// Leading/trailing/internal whitespace and letter case never
        /// change the derived key.
        #[test]
        fn prop_key_ignores_incidental_formatting(
            words in proptest::collection::vec("[a-zA-Z0-9]{1,8}", 1..5),
            pad in "[ \t]{0,4}",
        ) {
            let canonical = words.join(" ").to_lowercase();
            let noisy = format!("{pad}{}{pad}", words.join("  ").to_uppercase());

            let a = CacheKey::new(TaskType::CompanyLookup, &canonical, None);
            let b = CacheKey::new(TaskType::CompanyLookup, &noisy, None);
            proptest::prop_assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn test_ttl_override() {
        let mut config = CacheConfig::default();
        config.ttl_overrides_secs.insert(TaskType::NewsScan, 7200);
        let cache = ResponseCache::new(config);

        assert_eq!(cache.ttl_for(TaskType::NewsScan), Duration::from_secs(7200));
        assert_eq!(
            cache.ttl_for(TaskType::RegistryCheck),
            Duration::from_secs(30 * 24 * 3600)
        );
    }
}
