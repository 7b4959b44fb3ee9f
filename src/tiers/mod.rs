//! The shared tier capability (§9 design note): C1/C2/C3 all implement
//! `TierClassifier`, and `IntentRouter` (C5) folds over an ordered list of
//! them with per-tier thresholds instead of hand-coding three call sites.

pub mod llm;
pub mod pattern;
pub mod semantic;

pub use llm::LLMClassifier;
pub use pattern::PatternMatcher;
pub use semantic::SemanticRouter;

use crate::types::{IntentCategory, Layer, RequestContext};
use async_trait::async_trait;

/// Uniform output of any tier, prior to completeness/risk enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct TierOutcome {
    pub category: IntentCategory,
    pub sub_intent: String,
    pub confidence: f64,
    pub layer: Layer,
    pub missing_fields_hint: Vec<String>,
}

/// One classification layer. The LLM tier's threshold is always `0.0` —
/// it is the terminal tier and must emit *something* even when its
/// confidence is 0 (§4.5 step 3, §4.3 schema-failure case) — so folding
/// over the tier list with a uniform `confidence >= threshold()` check
/// naturally reaches it last and always accepts its result.
#[async_trait]
pub trait TierClassifier: Send + Sync {
    fn layer(&self) -> Layer;
    fn threshold(&self) -> f64;
    async fn try_classify(&self, text: &str, context: &RequestContext) -> Option<TierOutcome>;
}

/// Runs `tiers` in order, returning the first outcome whose confidence
/// clears its own tier's threshold. Per §4.5 this is eager fall-through:
/// a passing tier short-circuits and no lower tier runs.
///
/// `on_attempt` is invoked for every tier tried (including ones that fall
/// through), so the caller can record metrics without this helper knowing
/// about `Metrics` itself.
pub async fn fold_tiers(
    tiers: &[&(dyn TierClassifier)],
    text: &str,
    context: &RequestContext,
    mut on_attempt: impl FnMut(Layer, Option<&TierOutcome>),
) -> Option<TierOutcome> {
    for tier in tiers {
        let outcome = tier.try_classify(text, context).await;
        on_attempt(tier.layer(), outcome.as_ref());
        if let Some(outcome) = outcome {
            if outcome.confidence >= tier.threshold() {
                return Some(outcome);
            }
        }
    }
    None
}
