//! # vantage-core
//!
//! Deterministic foundations for the Vantage resilience layer.
//!
//! This crate holds everything that must not depend on I/O or model
//! calls:
//!
//! - the [`RiskProfile`] data model and its sufficiency rules
//! - the rule-based fragment merge used as fallback layer 3
//! - the task-complexity [`ModelRouter`]
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input always produces same output
//! 2. **No provider calls**: everything here is table- and rule-driven
//! 3. **Infallible merge**: the rule merge always yields a profile
//! 4. **Concurrency-free**: no shared mutable state anywhere
//!
//! ## Example
//!
//! ```rust
//! use vantage_core::{ModelRouter, ProfileFragment, RiskProfile, RuleMerger, SourceTier};
//!
//! let router = ModelRouter::default();
//! let models = router.route("what is the registered address of Acme Corp", None);
//! assert!(!models.is_empty());
//!
//! let merger = RuleMerger::default();
//! let profile = merger.merge(&[ProfileFragment::new(
//!     SourceTier::Verified,
//!     RiskProfile::named("Acme Corp"),
//! )]);
//! assert!(profile.has_required_fields());
//! ```

pub mod merge;
pub mod profile;
pub mod router;

// Re-export main types at crate root
pub use merge::{RuleMerger, DEFAULT_RATIO_TOLERANCE};
pub use profile::{
    ConfidenceTier, ConsensusSource, ProfileFragment, RiskProfile, SourceTier,
};
pub use router::{Complexity, ModelRouter, ModelSpec, RouterConfig, TaskType, TierModels};
