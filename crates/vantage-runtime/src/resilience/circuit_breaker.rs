//! Circuit breaker for provider protection.
//!
//! When calls to a provider fail repeatedly, its circuit opens and
//! subsequent calls fail fast into the fallback layers instead of
//! waiting out another timeout.
//!
//! # State Transitions
//! ```text
//! Closed → Open: `failure_threshold` consecutive failures
//! Open → Half-Open: after `cooldown` elapses
//! Half-Open → Closed: the single trial call succeeds
//! Half-Open → Open: the trial fails (cooldown clock restarts)
//! ```
//!
//! While Half-Open, exactly one caller is granted passage; everyone
//! else sees the circuit as unavailable until the trial settles.
//!
//! Thresholds and cooldowns are per-provider: critical providers get
//! slower, more forgiving settings because providers differ widely in
//! latency and failure characteristics.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::SharedStore;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a half-open trial (seconds).
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// State of one provider's circuit.
#[derive(Debug, Clone)]
enum CircuitState {
    /// Normal operation.
    Closed { failures: u32 },

    /// Failing fast, no calls allowed.
    Open { opened_at: Instant },

    /// Testing recovery; at most one trial call in flight.
    HalfOpen { trial_in_flight: bool },
}

/// Serializable view of a circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

/// Observability snapshot for one provider's circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub state: CircuitStateKind,
    pub failure_count: u32,
    /// Seconds until a half-open trial becomes possible; 0 unless Open.
    pub cooldown_remaining_secs: u64,
}

/// Per-provider circuit breaker.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    store: Option<Arc<dyn SharedStore>>,
}

impl CircuitBreaker {
    /// Create a breaker with one default configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            default_config: config,
            overrides: HashMap::new(),
            store: None,
        }
    }

    /// Per-provider threshold/cooldown overrides.
    pub fn with_overrides(mut self, overrides: HashMap<String, CircuitBreakerConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Mirror open-circuit markers through the shared store so other
    /// workers fail fast too.
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn config_for(&self, provider: &str) -> &CircuitBreakerConfig {
        self.overrides.get(provider).unwrap_or(&self.default_config)
    }

    /// Whether a call to the provider is currently allowed.
    ///
    /// In Open state past cooldown, exactly one caller is granted the
    /// half-open trial; concurrent callers see `false` until the trial
    /// settles via `record_success` or `record_failure`.
    pub fn is_available(&self, provider: &str) -> bool {
        let cooldown = self.config_for(provider).cooldown;
        let mut states = self.states.write();
        match states.get_mut(provider) {
            None => true,
            Some(state) => match state {
                CircuitState::Closed { .. } => true,
                CircuitState::Open { opened_at } => {
                    if opened_at.elapsed() >= cooldown {
                        // This caller wins the single trial slot.
                        *state = CircuitState::HalfOpen {
                            trial_in_flight: true,
                        };
                        tracing::info!(provider = %provider, "circuit half-open, trial granted");
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen { trial_in_flight } => {
                    if *trial_in_flight {
                        false
                    } else {
                        *trial_in_flight = true;
                        true
                    }
                }
            },
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self, provider: &str) {
        {
            let mut states = self.states.write();
            match states.get(provider).cloned() {
                Some(CircuitState::HalfOpen { .. }) => {
                    states.insert(provider.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(provider = %provider, "circuit closed after successful trial");
                }
                _ => {
                    // Any Closed success resets the consecutive count.
                    states.insert(provider.to_string(), CircuitState::Closed { failures: 0 });
                }
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&open_key(provider)).await {
                tracing::warn!(error = %e, "store unreachable, circuit close kept local");
            }
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self, provider: &str, reason: &str) {
        let threshold = self.config_for(provider).failure_threshold;
        let cooldown = self.config_for(provider).cooldown;

        let opened = {
            let mut states = self.states.write();
            match states.get(provider).cloned() {
                Some(CircuitState::Closed { failures }) => {
                    if failures + 1 >= threshold {
                        states.insert(
                            provider.to_string(),
                            CircuitState::Open {
                                opened_at: Instant::now(),
                            },
                        );
                        tracing::warn!(
                            provider = %provider,
                            failures = failures + 1,
                            reason = %reason,
                            "circuit opened after repeated failures"
                        );
                        true
                    } else {
                        states.insert(
                            provider.to_string(),
                            CircuitState::Closed {
                                failures: failures + 1,
                            },
                        );
                        false
                    }
                }
                Some(CircuitState::HalfOpen { .. }) => {
                    // Trial failed: reopen with a fresh cooldown clock.
                    states.insert(
                        provider.to_string(),
                        CircuitState::Open {
                            opened_at: Instant::now(),
                        },
                    );
                    tracing::warn!(
                        provider = %provider,
                        reason = %reason,
                        "circuit reopened after failed trial"
                    );
                    true
                }
                Some(CircuitState::Open { .. }) => false,
                None => {
                    let opened = threshold <= 1;
                    if opened {
                        states.insert(
                            provider.to_string(),
                            CircuitState::Open {
                                opened_at: Instant::now(),
                            },
                        );
                    } else {
                        states.insert(provider.to_string(), CircuitState::Closed { failures: 1 });
                    }
                    opened
                }
            }
        };

        if opened {
            if let Some(store) = &self.store {
                let marker = chrono::Utc::now().timestamp_millis().to_string();
                if let Err(e) = store.set(&open_key(provider), &marker, Some(cooldown)).await {
                    tracing::warn!(error = %e, "store unreachable, circuit open kept local");
                }
            }
        }
    }

    /// Pull the shared open marker into the local view.
    ///
    /// Called before availability checks so a circuit opened by another
    /// worker fails fast here too. Best effort: a store error leaves
    /// the local view untouched.
    pub async fn sync_from_store(&self, provider: &str) {
        let Some(store) = &self.store else { return };

        let marker = match store.get(&open_key(provider)).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "store unreachable, using local circuit view");
                return;
            }
        };

        let Some(opened_millis) = marker.and_then(|m| m.parse::<i64>().ok()) else {
            return;
        };

        let elapsed = (chrono::Utc::now().timestamp_millis() - opened_millis).max(0) as u64;
        let cooldown = self.config_for(provider).cooldown;
        if Duration::from_millis(elapsed) >= cooldown {
            return; // Marker about to lapse anyway.
        }

        let mut states = self.states.write();
        if matches!(
            states.get(provider),
            None | Some(CircuitState::Closed { .. })
        ) {
            states.insert(
                provider.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now() - Duration::from_millis(elapsed),
                },
            );
            tracing::info!(provider = %provider, "circuit opened from shared marker");
        }
    }

    /// Current status for observability.
    pub fn status(&self, provider: &str) -> CircuitStatus {
        let cooldown = self.config_for(provider).cooldown;
        let states = self.states.read();
        match states.get(provider) {
            None => CircuitStatus {
                state: CircuitStateKind::Closed,
                failure_count: 0,
                cooldown_remaining_secs: 0,
            },
            Some(CircuitState::Closed { failures }) => CircuitStatus {
                state: CircuitStateKind::Closed,
                failure_count: *failures,
                cooldown_remaining_secs: 0,
            },
            Some(CircuitState::Open { opened_at }) => {
                let remaining = cooldown.saturating_sub(opened_at.elapsed());
                CircuitStatus {
                    state: CircuitStateKind::Open,
                    failure_count: self.config_for(provider).failure_threshold,
                    cooldown_remaining_secs: remaining.as_secs(),
                }
            }
            Some(CircuitState::HalfOpen { .. }) => CircuitStatus {
                state: CircuitStateKind::HalfOpen,
                failure_count: 0,
                cooldown_remaining_secs: 0,
            },
        }
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn open_key(provider: &str) -> String {
    format!("vantage:circuit:open:{provider}")
}
