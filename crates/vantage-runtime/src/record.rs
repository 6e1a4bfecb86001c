//! Fallback provenance.
//!
//! Every resolution carries an ordered trail of layer attempts, winning
//! or not, so an auditor can reconstruct which layer, provider, and
//! model produced the answer. Inputs are redacted to essentials; the
//! record never holds credentials or raw provider payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The ordered fallback layers, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLayer {
    Cache,
    PrimarySearch,
    Synthesis,
    RuleMerge,
    Degraded,
}

impl FallbackLayer {
    /// Numeric position in the walk, 0 through 4.
    pub fn index(self) -> u8 {
        match self {
            FallbackLayer::Cache => 0,
            FallbackLayer::PrimarySearch => 1,
            FallbackLayer::Synthesis => 2,
            FallbackLayer::RuleMerge => 3,
            FallbackLayer::Degraded => 4,
        }
    }
}

/// One attempt within the fallback walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerAttempt {
    pub layer: FallbackLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// The audit trail for one resolution. Immutable once the request
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: Vec<LayerAttempt>,
}

impl FallbackRecord {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            attempts: Vec::new(),
        }
    }

    pub fn attempt(
        &mut self,
        layer: FallbackLayer,
        provider: Option<&str>,
        success: bool,
        error: Option<String>,
        elapsed_ms: u64,
    ) {
        self.attempts.push(LayerAttempt {
            layer,
            provider: provider.map(str::to_string),
            success,
            error,
            elapsed_ms,
        });
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// The layer that produced the final answer, if any succeeded.
    pub fn winning_layer(&self) -> Option<FallbackLayer> {
        self.attempts.iter().rev().find(|a| a.success).map(|a| a.layer)
    }
}
