//! Per-provider credential rotation with failure cooldowns.
//!
//! Each provider is configured with one or more API credentials. The
//! pool hands them out round-robin so no credential starves, and parks
//! failed credentials in a cooldown window so a revoked or rate-limited
//! key stops poisoning calls.
//!
//! Worker processes share rotation indices and cooldown markers through
//! the [`SharedStore`]: the index uses an atomic increment, the cooldown
//! a self-expiring marker keyed by credential fingerprint (never the
//! cleartext secret). When the store is unreachable the pool degrades
//! to its process-local state without surfacing an error.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::providers::ApiCredential;
use crate::store::SharedStore;

/// Default cooldown window for a failed credential.
pub const DEFAULT_CREDENTIAL_COOLDOWN: Duration = Duration::from_secs(300);

/// One credential and its rotation state.
pub struct PoolCredential {
    /// Non-secret identity: the credential's sha256 fingerprint.
    pub id: String,

    /// The secret itself, redacted everywhere by construction.
    pub secret: ApiCredential,

    failure_count: AtomicU32,
    success_count: AtomicU32,
    cooldown_until: RwLock<Option<Instant>>,
}

impl PoolCredential {
    fn new(secret: ApiCredential) -> Self {
        Self {
            id: secret.fingerprint(),
            secret,
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            cooldown_until: RwLock::new(None),
        }
    }

    /// Whether the credential is currently in cooldown.
    ///
    /// Cooldown clears automatically once the expiry passes; no reset
    /// sweep is needed.
    pub fn is_cooling(&self) -> bool {
        self.cooldown_until
            .read()
            .is_some_and(|until| Instant::now() < until)
    }

    /// Total failures recorded for this credential.
    pub fn failures(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Total successes recorded for this credential.
    pub fn successes(&self) -> u32 {
        self.success_count.load(Ordering::Relaxed)
    }

    fn cooldown_expiry(&self) -> Option<Instant> {
        *self.cooldown_until.read()
    }
}

impl std::fmt::Debug for PoolCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCredential")
            .field("id", &self.id)
            .field("cooling", &self.is_cooling())
            .field("failures", &self.failures())
            .field("successes", &self.successes())
            .finish()
    }
}

struct ProviderSlot {
    credentials: Vec<Arc<PoolCredential>>,
    cursor: AtomicUsize,
}

/// Rotating credential pool for all configured providers.
pub struct CredentialPool {
    cooldown: Duration,
    providers: RwLock<HashMap<String, ProviderSlot>>,
    store: Option<Arc<dyn SharedStore>>,
}

impl CredentialPool {
    /// Create a process-local pool.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            providers: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a pool that mirrors rotation and cooldowns through the
    /// shared store.
    pub fn with_store(cooldown: Duration, store: Arc<dyn SharedStore>) -> Self {
        Self {
            cooldown,
            providers: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Register a provider's credentials. Replaces any existing set.
    pub fn add_provider(&self, provider: impl Into<String>, secrets: Vec<ApiCredential>) {
        let slot = ProviderSlot {
            credentials: secrets
                .into_iter()
                .map(|s| Arc::new(PoolCredential::new(s)))
                .collect(),
            cursor: AtomicUsize::new(0),
        };
        self.providers.write().insert(provider.into(), slot);
    }

    /// Next usable credential for a provider, round-robin.
    ///
    /// Cooling credentials are skipped. If every credential is cooling,
    /// the one with the soonest expiry is returned as a best effort
    /// rather than failing outright. `None` only when the provider has
    /// no credentials configured at all.
    pub async fn next_credential(&self, provider: &str) -> Option<Arc<PoolCredential>> {
        let (candidates, start) = {
            let providers = self.providers.read();
            let slot = providers.get(provider)?;
            if slot.credentials.is_empty() {
                return None;
            }
            let local = slot.cursor.fetch_add(1, Ordering::Relaxed);
            (slot.credentials.clone(), local)
        };

        let len = candidates.len();
        let start = match self.shared_rotation_index(provider).await {
            Some(n) => n % len,
            None => start % len,
        };

        for offset in 0..len {
            let candidate = &candidates[(start + offset) % len];
            if candidate.is_cooling() {
                continue;
            }
            if self.store_says_cooling(provider, candidate).await {
                continue;
            }
            return Some(candidate.clone());
        }

        // Everything is cooling: soonest-to-recover wins.
        candidates
            .iter()
            .min_by_key(|c| c.cooldown_expiry().unwrap_or_else(Instant::now))
            .cloned()
    }

    /// Record a failed call: enter cooldown for the configured window.
    pub async fn mark_failed(&self, provider: &str, credential: &PoolCredential) {
        credential.failure_count.fetch_add(1, Ordering::Relaxed);
        *credential.cooldown_until.write() = Some(Instant::now() + self.cooldown);

        tracing::warn!(
            provider = %provider,
            credential = %credential.id,
            cooldown_secs = self.cooldown.as_secs(),
            "credential entered cooldown"
        );

        if let Some(store) = &self.store {
            let key = cooldown_key(provider, &credential.id);
            if let Err(e) = store.set(&key, "1", Some(self.cooldown)).await {
                tracing::warn!(error = %e, "store unreachable, cooldown kept local");
            }
        }
    }

    /// Record a successful call: clear any cooldown.
    pub async fn mark_succeeded(&self, provider: &str, credential: &PoolCredential) {
        credential.success_count.fetch_add(1, Ordering::Relaxed);
        *credential.cooldown_until.write() = None;

        if let Some(store) = &self.store {
            let key = cooldown_key(provider, &credential.id);
            if let Err(e) = store.delete(&key).await {
                tracing::warn!(error = %e, "store unreachable, cooldown clear kept local");
            }
        }
    }

    /// (available, total) credentials for a provider, local view.
    pub fn availability(&self, provider: &str) -> (usize, usize) {
        let providers = self.providers.read();
        match providers.get(provider) {
            Some(slot) => {
                let total = slot.credentials.len();
                let available = slot.credentials.iter().filter(|c| !c.is_cooling()).count();
                (available, total)
            }
            None => (0, 0),
        }
    }

    /// Provider names with at least one configured credential.
    pub fn providers(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Rotation index from the shared store, when reachable.
    async fn shared_rotation_index(&self, provider: &str) -> Option<usize> {
        let store = self.store.as_ref()?;
        match store.incr(&rotation_key(provider)).await {
            Ok(n) => Some((n - 1).max(0) as usize),
            Err(e) => {
                tracing::warn!(error = %e, "store unreachable, rotating locally");
                None
            }
        }
    }

    /// Best-effort check of the shared cooldown marker.
    ///
    /// A store error reads as "not cooling": the local view is the
    /// fallback authority.
    async fn store_says_cooling(&self, provider: &str, credential: &PoolCredential) -> bool {
        match &self.store {
            Some(store) => matches!(
                store.get(&cooldown_key(provider, &credential.id)).await,
                Ok(Some(_))
            ),
            None => false,
        }
    }
}

fn rotation_key(provider: &str) -> String {
    format!("vantage:cred:rot:{provider}")
}

fn cooldown_key(provider: &str, fingerprint: &str) -> String {
    format!("vantage:cred:cool:{provider}:{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;
    use crate::store::{MemoryStore, UnreachableStore};

    fn secrets(n: usize) -> Vec<ApiCredential> {
        (0..n)
            .map(|i| {
                ApiCredential::new(
                    format!("sk-key-{i}"),
                    CredentialSource::Programmatic,
                    format!("key {i}"),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let pool = CredentialPool::new(DEFAULT_CREDENTIAL_COOLDOWN);
        pool.add_provider("deepseek", secrets(3));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..9 {
            let cred = pool.next_credential("deepseek").await.unwrap();
            *counts.entry(cred.id.clone()).or_default() += 1;
        }

        // 9 calls over 3 credentials: exactly 3 each.
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&n| n == 3));
    }

    #[tokio::test]
    async fn test_rotation_fairness_uneven() {
        let pool = CredentialPool::new(DEFAULT_CREDENTIAL_COOLDOWN);
        pool.add_provider("deepseek", secrets(3));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let cred = pool.next_credential("deepseek").await.unwrap();
            *counts.entry(cred.id.clone()).or_default() += 1;
        }

        // 10 calls over 3 credentials: each selected 3 or 4 times.
        assert!(counts.values().all(|&n| n == 3 || n == 4));
    }

    #[tokio::test]
    async fn test_cooling_credential_skipped() {
        let pool = CredentialPool::new(DEFAULT_CREDENTIAL_COOLDOWN);
        pool.add_provider("deepseek", secrets(2));

        let bad = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &bad).await;

        for _ in 0..4 {
            let cred = pool.next_credential("deepseek").await.unwrap();
            assert_ne!(cred.id, bad.id);
        }

        assert_eq!(pool.availability("deepseek"), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_auto_clears() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        pool.add_provider("deepseek", secrets(2));

        let bad = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &bad).await;
        assert!(bad.is_cooling());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!bad.is_cooling());
        assert_eq!(pool.availability("deepseek"), (2, 2));
    }

    #[tokio::test]
    async fn test_all_cooling_returns_soonest() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        pool.add_provider("deepseek", secrets(2));

        let a = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &a).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &b).await;

        // Best effort: still hands something out.
        let cred = pool.next_credential("deepseek").await;
        assert!(cred.is_some());
        // `a` failed first, so it recovers first.
        assert_eq!(cred.unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_success_clears_cooldown() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        pool.add_provider("deepseek", secrets(1));

        let cred = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &cred).await;
        assert!(cred.is_cooling());

        pool.mark_succeeded("deepseek", &cred).await;
        assert!(!cred.is_cooling());
        assert_eq!(cred.successes(), 1);
        assert_eq!(cred.failures(), 1);
    }

    #[tokio::test]
    async fn test_store_cooldown_visible_across_pools() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let pool_a = CredentialPool::with_store(Duration::from_secs(300), store.clone());
        let pool_b = CredentialPool::with_store(Duration::from_secs(300), store.clone());
        pool_a.add_provider("deepseek", secrets(2));
        pool_b.add_provider("deepseek", secrets(2));

        let bad = pool_a.next_credential("deepseek").await.unwrap();
        pool_a.mark_failed("deepseek", &bad).await;

        // The second worker skips it via the shared marker even though
        // its local state never saw the failure.
        for _ in 0..4 {
            let cred = pool_b.next_credential("deepseek").await.unwrap();
            assert_ne!(cred.id, bad.id);
        }
    }

    #[tokio::test]
    async fn test_store_only_holds_fingerprints() {
        let store = Arc::new(MemoryStore::new());
        let pool =
            CredentialPool::with_store(Duration::from_secs(300), store.clone() as Arc<dyn SharedStore>);
        pool.add_provider("deepseek", secrets(1));

        let cred = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &cred).await;

        // The cleartext secret must not appear in any store key.
        let marker = store
            .get(&cooldown_key("deepseek", &cred.id))
            .await
            .unwrap();
        assert!(marker.is_some());
        assert!(!cooldown_key("deepseek", &cred.id).contains("sk-key-0"));
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_local() {
        let pool = CredentialPool::with_store(
            Duration::from_secs(300),
            Arc::new(UnreachableStore) as Arc<dyn SharedStore>,
        );
        pool.add_provider("deepseek", secrets(2));

        // Rotation, failure, and success paths all stay functional.
        let cred = pool.next_credential("deepseek").await.unwrap();
        pool.mark_failed("deepseek", &cred).await;
        assert!(cred.is_cooling());

        let other = pool.next_credential("deepseek").await.unwrap();
        assert_ne!(other.id, cred.id);
        pool.mark_succeeded("deepseek", &other).await;
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let pool = CredentialPool::new(DEFAULT_CREDENTIAL_COOLDOWN);
        assert!(pool.next_credential("nope").await.is_none());
        assert_eq!(pool.availability("nope"), (0, 0));
    }
}
