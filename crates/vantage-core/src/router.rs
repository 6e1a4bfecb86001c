//! Task-complexity classification and model-tier routing.
//!
//! The router picks the cheapest model tier adequate for a task,
//! independently of any failure state. Classification is pure pattern
//! scoring over the task text (English and Chinese indicator classes
//! plus a length signal); an explicit task type short-circuits scoring
//! through a static lookup table.
//!
//! Stateless beyond its configuration, so concurrent use is free.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Task complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Known task types with fixed complexity assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Look up basic registration facts.
    CompanyLookup,

    /// Full risk assessment with scoring and narrative.
    RiskAssessment,

    /// Registry/watchlist membership check.
    RegistryCheck,

    /// Scan recent news for adverse signals.
    NewsScan,

    /// Cross-validate a profile produced by another provider.
    Validation,
}

impl TaskType {
    /// Static lookup: explicit task types bypass text scoring entirely.
    pub fn complexity(self) -> Complexity {
        match self {
            TaskType::CompanyLookup | TaskType::RegistryCheck => Complexity::Simple,
            TaskType::NewsScan | TaskType::Validation => Complexity::Moderate,
            TaskType::RiskAssessment => Complexity::Complex,
        }
    }
}

/// One provider/model pair a tier can route to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider id as registered in the provider registry.
    pub provider: String,

    /// Model identifier passed through to the provider.
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Ordered model list for one complexity tier, primary first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    /// Preferred model for the tier.
    pub primary: ModelSpec,

    /// Fallback models tried in order after the primary.
    #[serde(default)]
    pub fallbacks: Vec<ModelSpec>,
}

impl TierModels {
    /// Primary-first ordered view.
    pub fn ordered(&self) -> Vec<ModelSpec> {
        let mut out = Vec::with_capacity(1 + self.fallbacks.len());
        out.push(self.primary.clone());
        out.extend(self.fallbacks.iter().cloned());
        out
    }
}

lazy_static! {
    // Complexity indicators. Scores are additive per class; the tier
    // with the highest score wins, ties default to Moderate.

    /// Signals of deep analytical work (English).
    static ref COMPLEX_EN: Regex = Regex::new(
        r"(?i)\b(assess|analy[sz]e|evaluate|compare|forecast|strategy|comprehensive|due diligence|supply chain|compliance)\b"
    ).unwrap();

    /// Signals of deep analytical work (Chinese).
    static ref COMPLEX_ZH: Regex = Regex::new(
        "(评估|分析|尽职调查|供应链|合规|风险等级|综合|战略)"
    ).unwrap();

    /// Signals of simple factual lookups (English).
    static ref SIMPLE_EN: Regex = Regex::new(
        r"(?i)\b(what is|who is|when|where|list|lookup|look up|address|phone|registration number)\b"
    ).unwrap();

    /// Signals of simple factual lookups (Chinese).
    static ref SIMPLE_ZH: Regex = Regex::new(
        "(是什么|是谁|在哪|地址|电话|注册号|查询|名单)"
    ).unwrap();
}

/// Length thresholds for the task-text signal, in characters.
const SHORT_TASK_CHARS: usize = 60;
const LONG_TASK_CHARS: usize = 300;

/// Router configuration: one ordered model list per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub simple: TierModels,
    pub moderate: TierModels,
    pub complex: TierModels,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            simple: TierModels {
                primary: ModelSpec::new("deepseek", "deepseek-chat"),
                fallbacks: vec![ModelSpec::new("qwen", "qwen-turbo")],
            },
            moderate: TierModels {
                primary: ModelSpec::new("deepseek", "deepseek-chat"),
                fallbacks: vec![ModelSpec::new("qwen", "qwen-plus")],
            },
            complex: TierModels {
                primary: ModelSpec::new("deepseek", "deepseek-reasoner"),
                fallbacks: vec![ModelSpec::new("qwen", "qwen-max")],
            },
        }
    }
}

/// Routes tasks to the cheapest adequate model tier.
#[derive(Debug, Clone, Default)]
pub struct ModelRouter {
    config: RouterConfig,
}

impl ModelRouter {
    /// Create a router from tier configuration.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Classify a task's complexity.
    ///
    /// An explicit task type wins over text scoring. Otherwise the text
    /// (and any context snippets) is scored against the indicator
    /// classes; ties and no-signal default to Moderate.
    pub fn classify(
        &self,
        task_text: &str,
        context: Option<&str>,
        explicit: Option<TaskType>,
    ) -> Complexity {
        if let Some(task_type) = explicit {
            return task_type.complexity();
        }

        let mut text = task_text.to_string();
        if let Some(ctx) = context {
            text.push(' ');
            text.push_str(ctx);
        }

        let mut complex_score = 0u32;
        let mut simple_score = 0u32;

        complex_score += COMPLEX_EN.find_iter(&text).count() as u32;
        complex_score += COMPLEX_ZH.find_iter(&text).count() as u32;
        simple_score += SIMPLE_EN.find_iter(&text).count() as u32;
        simple_score += SIMPLE_ZH.find_iter(&text).count() as u32;

        let chars = task_text.chars().count();
        if chars >= LONG_TASK_CHARS {
            complex_score += 1;
        } else if chars <= SHORT_TASK_CHARS {
            simple_score += 1;
        }

        if complex_score > simple_score {
            Complexity::Complex
        } else if simple_score > complex_score && complex_score == 0 {
            Complexity::Simple
        } else {
            Complexity::Moderate
        }
    }

    /// Ordered model list for a complexity tier, primary first.
    pub fn models_for(&self, complexity: Complexity) -> Vec<ModelSpec> {
        match complexity {
            Complexity::Simple => self.config.simple.ordered(),
            Complexity::Moderate => self.config.moderate.ordered(),
            Complexity::Complex => self.config.complex.ordered(),
        }
    }

    /// Classify and route in one step: the primary entry point.
    pub fn route(&self, task_text: &str, context: Option<&str>) -> Vec<ModelSpec> {
        let complexity = self.classify(task_text, context, None);
        tracing::debug!(?complexity, "routed task");
        self.models_for(complexity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_type_wins() {
        let router = ModelRouter::default();
        // Text screams "complex", explicit type says lookup.
        let c = router.classify(
            "comprehensive supply chain risk analysis",
            None,
            Some(TaskType::CompanyLookup),
        );
        assert_eq!(c, Complexity::Simple);
    }

    #[test]
    fn test_simple_lookup_text() {
        let router = ModelRouter::default();
        assert_eq!(
            router.classify("What is the registered address?", None, None),
            Complexity::Simple
        );
        assert_eq!(
            router.classify("这家公司的注册号是什么", None, None),
            Complexity::Simple
        );
    }

    #[test]
    fn test_complex_analysis_text() {
        let router = ModelRouter::default();
        assert_eq!(
            router.classify(
                "Assess and compare the compliance posture and supply chain exposure \
                 of this supplier, including a due diligence summary",
                None,
                None
            ),
            Complexity::Complex
        );
        assert_eq!(
            router.classify("请对该供应商进行全面风险评估和尽职调查分析", None, None),
            Complexity::Complex
        );
    }

    #[test]
    fn test_no_signal_defaults_moderate() {
        let router = ModelRouter::default();
        let text = "Tell me about Acme Corp and its recent activity in European markets, focusing on anything notable.";
        assert_eq!(router.classify(text, None, None), Complexity::Moderate);
    }

    #[test]
    fn test_models_ordered_primary_first() {
        let router = ModelRouter::default();
        let models = router.models_for(Complexity::Complex);
        assert_eq!(models[0].model, "deepseek-reasoner");
        assert!(models.len() >= 2);
    }

    #[test]
    fn test_route_end_to_end() {
        let router = ModelRouter::default();
        let models = router.route("list registered address", None);
        assert_eq!(models[0].provider, "deepseek");
        assert_eq!(models[0].model, "deepseek-chat");
    }

    #[test]
    fn test_static_lookup_table() {
        assert_eq!(TaskType::RiskAssessment.complexity(), Complexity::Complex);
        assert_eq!(TaskType::RegistryCheck.complexity(), Complexity::Simple);
        assert_eq!(TaskType::Validation.complexity(), Complexity::Moderate);
    }
}
