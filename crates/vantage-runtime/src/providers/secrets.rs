//! Secure credential handling for provider clients.
//!
//! Centralized, type-safe handling of API credentials:
//!
//! - **No accidental logging**: credentials cannot appear in
//!   Debug/Display output
//! - **Memory safety**: credentials are zeroed on drop
//! - **Store safety**: only a one-way fingerprint identifies a
//!   credential in the shared store, never the cleartext value
//!
//! ## Usage
//!
//! ```ignore
//! let cred = ApiCredential::from_env("DEEPSEEK_API_KEY", "DeepSeek API key")?;
//!
//! // Expose only at the point of use
//! request.header("authorization", format!("Bearer {}", cred.expose()));
//!
//! // Identify in the shared store
//! store.set(&format!("cred:cooldown:{}", cred.fingerprint()), "1", ttl).await;
//! ```

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;

use super::ProviderError;

/// Length of the hex fingerprint used to identify credentials.
const FINGERPRINT_LEN: usize = 12;

/// Where a credential was loaded from.
///
/// Useful for debugging configuration issues without exposing the
/// actual credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from configuration
    Config,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// Debug and Display show `[REDACTED]`; the raw value is reachable
/// only through [`expose`](Self::expose). The sha256-derived
/// [`fingerprint`](Self::fingerprint) is the credential's identity in
/// logs and the shared store.
#[derive(Clone)]
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: String,
}

impl ApiCredential {
    /// Wrap a credential value.
    pub fn new(
        value: impl Into<String>,
        source: CredentialSource,
        name: impl Into<String>,
    ) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name: name.into(),
        }
    }

    /// Load a credential from an environment variable.
    pub fn from_env(env_var: &str, name: impl Into<String>) -> Result<Self, ProviderError> {
        let name = name.into();
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name.clone()))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Expose the credential value for use in an API call.
    ///
    /// Only call this where the credential is actually needed (setting
    /// an HTTP header); never store the exposed value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// One-way identity of this credential.
    ///
    /// Short sha256 hex prefix, stable across processes. This is the
    /// only form of the credential ever written to the shared store.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.value.expose_secret().as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..FINGERPRINT_LEN].to_string()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Get the source of this credential.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Get the human-readable name of this credential.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint())
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
