//! Deterministic rule-based merge of profile fragments.
//!
//! Layer 3 of the fallback chain. When the provider-backed layers fail
//! or return nothing usable, whatever raw fragments exist are merged
//! here with fixed rules and no model calls:
//!
//! 1. Field conflicts resolve by source-tier priority
//!    (Verified > CrossValidated > Inferred > Prior > Unknown).
//! 2. Numeric fields are clamped to their valid ranges.
//! 3. Complementary percentages (export/domestic) are rebalanced when
//!    their sum drifts from 100 beyond a small tolerance.
//!
//! Same fragments in, same profile out. This module never fails.

use crate::profile::{ProfileFragment, RiskProfile};

/// Default allowed drift of `export_ratio + domestic_ratio` from 100.
pub const DEFAULT_RATIO_TOLERANCE: f64 = 5.0;

/// Deterministic merger with fixed source-priority rules.
#[derive(Debug, Clone)]
pub struct RuleMerger {
    /// Allowed drift of the ratio pair's sum from 100 before rebalancing.
    ratio_tolerance: f64,
}

impl Default for RuleMerger {
    fn default() -> Self {
        Self {
            ratio_tolerance: DEFAULT_RATIO_TOLERANCE,
        }
    }
}

impl RuleMerger {
    /// Create a merger with a custom ratio tolerance.
    pub fn new(ratio_tolerance: f64) -> Self {
        Self { ratio_tolerance }
    }

    /// Merge fragments into a single profile.
    ///
    /// Fragments are sorted by tier (most trustworthy first); each field
    /// takes its value from the highest-priority fragment that has it.
    /// An empty fragment list yields an empty profile.
    pub fn merge(&self, fragments: &[ProfileFragment]) -> RiskProfile {
        let mut ordered: Vec<&ProfileFragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.tier);

        let mut merged = RiskProfile::default();
        for fragment in &ordered {
            merged.fill_from(&fragment.profile);
        }

        // Risk lists accumulate across sources instead of first-wins.
        let mut key_risks: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        for fragment in &ordered {
            for risk in &fragment.profile.key_risks {
                if !key_risks.contains(risk) {
                    key_risks.push(risk.clone());
                }
            }
            for source in &fragment.profile.sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
        merged.key_risks = key_risks;
        merged.sources = sources;

        self.normalize(&mut merged);
        merged
    }

    /// Clamp numeric fields and reconcile the ratio pair in place.
    pub fn normalize(&self, profile: &mut RiskProfile) {
        if let Some(score) = profile.risk_score.as_mut() {
            *score = score.clamp(0.0, 100.0);
        }
        if let Some(export) = profile.export_ratio.as_mut() {
            *export = export.clamp(0.0, 100.0);
        }
        if let Some(domestic) = profile.domestic_ratio.as_mut() {
            *domestic = domestic.clamp(0.0, 100.0);
        }

        self.reconcile_ratios(profile);
    }

    /// Rebalance export/domestic so the pair sums to 100.
    ///
    /// With both present and the sum drifted beyond tolerance, both are
    /// rescaled proportionally. With exactly one present, the complement
    /// is inferred. A zero sum splits evenly rather than dividing by zero.
    fn reconcile_ratios(&self, profile: &mut RiskProfile) {
        match (profile.export_ratio, profile.domestic_ratio) {
            (Some(export), Some(domestic)) => {
                let sum = export + domestic;
                if (sum - 100.0).abs() > self.ratio_tolerance {
                    if sum == 0.0 {
                        profile.export_ratio = Some(50.0);
                        profile.domestic_ratio = Some(50.0);
                    } else {
                        profile.export_ratio = Some(export / sum * 100.0);
                        profile.domestic_ratio = Some(domestic / sum * 100.0);
                    }
                    tracing::debug!(
                        original_sum = sum,
                        "rebalanced export/domestic ratio pair to 100"
                    );
                }
            }
            (Some(export), None) => {
                profile.domestic_ratio = Some((100.0 - export).clamp(0.0, 100.0));
            }
            (None, Some(domestic)) => {
                profile.export_ratio = Some((100.0 - domestic).clamp(0.0, 100.0));
            }
            (None, None) => {}
        }
    }
}
