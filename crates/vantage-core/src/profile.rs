//! Risk-profile data model.
//!
//! A [`RiskProfile`] is the structured answer the orchestration layer
//! produces for a company query. Every analytic field is optional:
//! providers routinely return partial data, and partial data is still
//! usable downstream (it feeds the synthesis and rule-merge layers
//! instead of being discarded).

use serde::{Deserialize, Serialize};

/// Structured risk answer for a single company.
///
/// The only required field is `company_name`; the rest are populated
/// opportunistically from whichever sources responded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Legal or trading name of the company.
    pub company_name: Option<String>,

    /// ISO country of registration.
    pub registration_country: Option<String>,

    /// Primary industry classification.
    pub industry: Option<String>,

    /// Composite risk score, 0.0 (lowest) to 100.0 (highest).
    pub risk_score: Option<f64>,

    /// Share of revenue from exports, in percent.
    pub export_ratio: Option<f64>,

    /// Share of revenue from the domestic market, in percent.
    ///
    /// Complementary to `export_ratio`: the pair should sum to 100.
    pub domestic_ratio: Option<f64>,

    /// Narrative summary of the risk posture.
    pub summary: Option<String>,

    /// Specific risk factors identified by providers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_risks: Vec<String>,

    /// Source citations (URLs or provider identifiers).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    /// True when this profile came from the graceful-degradation layer.
    #[serde(default)]
    pub degraded: bool,

    /// Why the profile is degraded, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl RiskProfile {
    /// Create an empty profile carrying only the company name.
    pub fn named(company_name: impl Into<String>) -> Self {
        Self {
            company_name: Some(company_name.into()),
            ..Default::default()
        }
    }

    /// Count of populated analytic fields.
    ///
    /// `key_risks` and `sources` each count once when non-empty. The
    /// `degraded` marker and its reason are bookkeeping, not data, and
    /// are never counted.
    pub fn populated_fields(&self) -> usize {
        let mut n = 0;
        n += self.company_name.is_some() as usize;
        n += self.registration_country.is_some() as usize;
        n += self.industry.is_some() as usize;
        n += self.risk_score.is_some() as usize;
        n += self.export_ratio.is_some() as usize;
        n += self.domestic_ratio.is_some() as usize;
        n += self.summary.is_some() as usize;
        n += (!self.key_risks.is_empty()) as usize;
        n += (!self.sources.is_empty()) as usize;
        n
    }

    /// Whether the required field set is present.
    pub fn has_required_fields(&self) -> bool {
        self.company_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }

    /// Sufficiency check applied uniformly to cache hits and synthesis
    /// outputs before a fallback layer is allowed to short-circuit.
    ///
    /// A profile is sufficient when the required fields are present and
    /// at least `min_extra_fields` additional fields are populated.
    pub fn is_sufficient(&self, min_extra_fields: usize) -> bool {
        self.has_required_fields() && self.populated_fields() >= 1 + min_extra_fields
    }

    /// True when any analytic field beyond the name is populated.
    pub fn has_any_data(&self) -> bool {
        self.populated_fields() > self.company_name.is_some() as usize
    }

    /// Fill empty fields of `self` from `other`, leaving populated
    /// fields untouched.
    pub fn fill_from(&mut self, other: &RiskProfile) {
        if self.company_name.is_none() {
            self.company_name = other.company_name.clone();
        }
        if self.registration_country.is_none() {
            self.registration_country = other.registration_country.clone();
        }
        if self.industry.is_none() {
            self.industry = other.industry.clone();
        }
        if self.risk_score.is_none() {
            self.risk_score = other.risk_score;
        }
        if self.export_ratio.is_none() {
            self.export_ratio = other.export_ratio;
        }
        if self.domestic_ratio.is_none() {
            self.domestic_ratio = other.domestic_ratio;
        }
        if self.summary.is_none() {
            self.summary = other.summary.clone();
        }
        if self.key_risks.is_empty() {
            self.key_risks = other.key_risks.clone();
        }
        if self.sources.is_empty() {
            self.sources = other.sources.clone();
        }
    }
}

/// Where a profile fragment came from, ordered by trustworthiness.
///
/// The rule-based merge resolves field conflicts by this fixed priority:
/// Verified > CrossValidated > Inferred > Prior > Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Confirmed by a search-capable provider with citations.
    Verified,

    /// Cross-checked by a second, independent provider.
    CrossValidated,

    /// Inferred by a model without direct evidence.
    Inferred,

    /// Carried over from a previously known profile.
    Prior,

    /// Origin unknown.
    Unknown,
}

/// A partial profile tagged with its source tier.
///
/// Raw material for the deterministic rule-based merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFragment {
    /// Trustworthiness of the source.
    pub tier: SourceTier,

    /// The partial data itself.
    pub profile: RiskProfile,
}

impl ProfileFragment {
    /// Tag a profile with its source tier.
    pub fn new(tier: SourceTier, profile: RiskProfile) -> Self {
        Self { tier, profile }
    }
}

/// Declared confidence of a consensus input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// One provider's answer as input to the synthesis step.
///
/// Ephemeral: exists only for the duration of a single consensus merge.
#[derive(Debug, Clone)]
pub struct ConsensusSource {
    /// Provider that produced this payload.
    pub provider: String,

    /// The payload itself, possibly partial.
    pub payload: RiskProfile,

    /// Confidence declared for this source.
    pub confidence: ConfidenceTier,
}
