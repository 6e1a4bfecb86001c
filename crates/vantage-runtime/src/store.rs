//! Durable shared-store abstraction.
//!
//! Worker processes coordinate through a common key-value store:
//! cache tier 2, circuit-open markers, credential cooldowns, and
//! rotation indices all live here. The store itself is an external
//! collaborator (typically Redis-shaped); this module defines the
//! trait and an in-process implementation used both as the degraded
//! fallback when the real store is unreachable and as the test double.
//!
//! Every caller in this crate treats store errors as degradation,
//! never as request failure.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors from the shared store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Value at '{key}' is not numeric")]
    NotNumeric { key: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Key-value store shared by all worker processes.
///
/// Semantics follow the common Redis subset the runtime needs:
/// values are strings, TTLs self-expire, `incr` is atomic.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically increment a numeric value, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set or refresh the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a single key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key starting with `prefix`; returns the count.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store.
///
/// Single-process semantics only; used as the transparent fallback
/// when the durable store is unreachable, and as the store in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Called opportunistically on writes so the
    /// map does not grow without bound.
    fn purge_expired(&self) {
        self.entries.write().retain(|_, e| !e.expired());
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.purge_expired();
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key).filter(|e| !e.expired()) {
            Some(entry) => {
                let n: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError::NotNumeric {
                        key: key.to_string(),
                    })?;
                entry.value = (n + 1).to_string();
                Ok(n + 1)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store double that fails every call.
///
/// Exercises the degrade-to-local paths in tests.
#[derive(Default)]
pub struct UnreachableStore;

#[async_trait]
impl SharedStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unreachable("store down".to_string()))
    }
}
