//! Static provider registry.
//!
//! Provider clients are constructed once at process startup and stored
//! in a typed map keyed by provider id. Lookup failures surface as a
//! typed [`ProviderError::NotConfigured`], never as a runtime import or
//! reflection error.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ProviderClient, ProviderError};

/// Registry of provider clients, populated at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    clients: BTreeMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own name.
    ///
    /// Re-registering a name replaces the previous client.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    /// Builder-style registration.
    pub fn with(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.register(client);
        self
    }

    /// Look up a client by provider id.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        self.clients.get(provider).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider '{}'. Registered: {:?}",
                provider,
                self.names()
            ))
        })
    }

    /// Registered provider ids, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(|s| s.as_str()).collect()
    }

    /// Check whether a provider id is registered.
    pub fn has(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
