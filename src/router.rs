//! C5 IntentRouter: the coordinator that runs the tier cascade, fills in
//! completeness, and tags the winning layer (§4.5).

use crate::completeness::CompletenessChecker;
use crate::config::{RouterConfig, RuleSnapshot};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::tiers::llm::LLMClient;
use crate::tiers::semantic::Embedder;
use crate::tiers::{fold_tiers, LLMClassifier, PatternMatcher, SemanticRouter, TierClassifier};
use crate::types::{IntentCategory, RequestContext, RiskLevel, RoutingDecision, WorkflowType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub(crate) fn baseline_risk(category: IntentCategory) -> RiskLevel {
    match category {
        IntentCategory::Incident | IntentCategory::Change => RiskLevel::High,
        IntentCategory::Request => RiskLevel::Medium,
        IntentCategory::Query | IntentCategory::Unknown => RiskLevel::Low,
    }
}

pub(crate) fn workflow_for(category: IntentCategory, sub_intent: &str) -> WorkflowType {
    match (category, sub_intent) {
        (IntentCategory::Incident, "system_unavailable") => WorkflowType::Magentic,
        (IntentCategory::Incident, _) => WorkflowType::Sequential,
        (IntentCategory::Change, "release_deployment") => WorkflowType::Magentic,
        (IntentCategory::Change, _) => WorkflowType::Sequential,
        (IntentCategory::Request, _) | (IntentCategory::Query, _) | (IntentCategory::Unknown, _) => {
            WorkflowType::Simple
        }
    }
}

/// Wires C1+C2+C3 into the tiered cascade described in §4.5.
pub struct IntentRouter {
    pattern: PatternMatcher,
    semantic: SemanticRouter,
    llm: LLMClassifier,
    completeness: Arc<CompletenessChecker>,
    metrics: Metrics,
}

impl IntentRouter {
    pub fn new(
        pattern: PatternMatcher,
        semantic: SemanticRouter,
        llm: LLMClassifier,
        completeness: Arc<CompletenessChecker>,
        metrics: Metrics,
    ) -> Self {
        Self {
            pattern,
            semantic,
            llm,
            completeness,
            metrics,
        }
    }

    /// Builds the wired coordinator from a loaded `RuleSnapshot` and
    /// `RouterConfig` (§5, §6.1): compiles `pattern_rules` into
    /// `PatternMatcher`, embeds `semantic_routes` into `SemanticRouter`,
    /// derives the LLM's closed vocabulary from every `(category,
    /// sub_intent)` pair the snapshot names, and compiles
    /// `completeness_rules` into `CompletenessChecker`. This is the
    /// assembly point a config reload re-runs to produce a fresh,
    /// independently-immutable `IntentRouter` before swapping the
    /// `RuleSnapshotHandle` it was built from (§5 "config reload produces
    /// a new snapshot and atomically swaps the reference").
    pub async fn from_snapshot(
        snapshot: &RuleSnapshot,
        config: &RouterConfig,
        embedder: Arc<dyn Embedder>,
        llm_client: Arc<dyn LLMClient>,
        metrics: Metrics,
    ) -> Result<Self> {
        let pattern = PatternMatcher::load(snapshot.pattern_rules.clone(), config.pattern_threshold)?;
        let semantic = SemanticRouter::load(
            snapshot.semantic_routes.clone(),
            embedder,
            config.semantic_threshold,
        )
        .await?;
        let allowed_pairs = snapshot.allowed_llm_pairs()?;
        let llm = LLMClassifier::new(llm_client, config.llm_timeout, allowed_pairs);
        let completeness = Arc::new(CompletenessChecker::load(snapshot.completeness_rules.clone())?);
        Ok(Self::new(pattern, semantic, llm, completeness, metrics))
    }

    /// Shared with `GuidedDialogEngine` (§4.6 step 4), which recomputes
    /// completeness after refinement using the same rule table C5 used.
    pub fn completeness(&self) -> &Arc<CompletenessChecker> {
        &self.completeness
    }

    /// Runs pattern → semantic → llm with eager threshold-gated
    /// fall-through, then completeness, risk, and workflow mapping
    /// (§4.5). Safe for concurrent calls: every tier and rule table is
    /// load-time-immutable.
    pub async fn route(&self, text: &str, context: &RequestContext) -> RoutingDecision {
        let start = Instant::now();
        let tiers: Vec<&dyn TierClassifier> = vec![&self.pattern, &self.semantic, &self.llm];
        let outcome = fold_tiers(&tiers, text, context, |layer, result| {
            tracing::debug!(?layer, hit = result.is_some(), "tier attempt");
        })
        .await
        .expect("the llm tier has threshold 0.0 and always emits a result");

        let mut extracted_fields: HashMap<String, serde_json::Value> = HashMap::new();
        let completeness = self.completeness.check(
            outcome.category,
            &outcome.sub_intent,
            &mut extracted_fields,
            text,
        );

        let risk_level = baseline_risk(outcome.category);
        let workflow_type = workflow_for(outcome.category, &outcome.sub_intent);
        let latency_ms = start.elapsed().as_millis() as u64;

        self.metrics
            .inc_routing_requests(outcome.category.as_str(), outcome.layer.as_str());
        self.metrics
            .observe_routing_latency(outcome.layer.as_str(), start.elapsed().as_secs_f64());

        tracing::info!(
            category = outcome.category.as_str(),
            sub_intent = %outcome.sub_intent,
            layer = outcome.layer.as_str(),
            confidence = outcome.confidence,
            sufficient = completeness.is_sufficient(),
            "intent classified"
        );

        RoutingDecision {
            intent_category: outcome.category,
            sub_intent: outcome.sub_intent,
            confidence: outcome.confidence,
            risk_level,
            workflow_type,
            layer_used: outcome.layer,
            completeness,
            extracted_fields,
            latency_ms,
            raw_input: text.to_string(),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::rules::PatternRuleDef;
    use crate::tiers::llm::{LLMClient, LlmRawResponse};
    use crate::tiers::semantic::Embedder;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NeverEmbed;
    #[async_trait]
    impl Embedder for NeverEmbed {
        async fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    struct UnknownLlm;
    #[async_trait]
    impl LLMClient for UnknownLlm {
        async fn complete_structured(&self, _prompt: &str) -> crate::error::Result<LlmRawResponse> {
            Err(Error::UpstreamUnavailable("no llm configured in test".into()))
        }
    }

    async fn router_with_one_pattern_rule() -> IntentRouter {
        let pattern = PatternMatcher::load(
            vec![PatternRuleDef {
                id: "etl".into(),
                category: "incident".into(),
                sub_intent: "etl_failure".into(),
                priority: 100,
                base_confidence: 0.98,
                patterns: vec![r"\bETL\b.*(failed|error)".into()],
            }],
            0.90,
        )
        .unwrap();
        let semantic = SemanticRouter::load(vec![], Arc::new(NeverEmbed), 0.85)
            .await
            .unwrap();
        let llm = LLMClassifier::new(Arc::new(UnknownLlm), Duration::from_millis(50), vec![]);
        let completeness = Arc::new(CompletenessChecker::load(vec![]).unwrap());
        IntentRouter::new(pattern, semantic, llm, completeness, Metrics::new())
    }

    #[tokio::test]
    async fn from_snapshot_wires_pattern_rules_threshold_and_llm_vocabulary() {
        let snapshot = RuleSnapshot {
            pattern_rules: vec![PatternRuleDef {
                id: "etl".into(),
                category: "incident".into(),
                sub_intent: "etl_failure".into(),
                priority: 100,
                base_confidence: 0.98,
                patterns: vec![r"\bETL\b.*(failed|error)".into()],
            }],
            ..RuleSnapshot::default()
        };
        let config = RouterConfig::default().with_pattern_threshold(0.90);
        let router = IntentRouter::from_snapshot(
            &snapshot,
            &config,
            Arc::new(NeverEmbed),
            Arc::new(UnknownLlm),
            Metrics::new(),
        )
        .await
        .unwrap();

        let decision = router
            .route("ETL job failed overnight", &RequestContext::default())
            .await;
        assert_eq!(decision.layer_used, crate::types::Layer::Pattern);
        assert_eq!(decision.intent_category, IntentCategory::Incident);
        assert_eq!(decision.sub_intent, "etl_failure");
    }

    #[tokio::test]
    async fn high_confidence_pattern_hit_short_circuits_at_pattern_layer() {
        let router = router_with_one_pattern_rule().await;
        let decision = router
            .route("ETL job failed overnight", &RequestContext::default())
            .await;
        assert_eq!(decision.layer_used, crate::types::Layer::Pattern);
        assert_eq!(decision.intent_category, IntentCategory::Incident);
        assert!(decision.confidence >= 0.90);
    }

    #[tokio::test]
    async fn unmatched_text_falls_through_to_llm_and_is_unknown() {
        let router = router_with_one_pattern_rule().await;
        let decision = router
            .route("completely unrelated text", &RequestContext::default())
            .await;
        assert_eq!(decision.layer_used, crate::types::Layer::Llm);
        assert_eq!(decision.intent_category, IntentCategory::Unknown);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn empty_input_classifies_as_unknown_with_zero_confidence() {
        let router = router_with_one_pattern_rule().await;
        let decision = router.route("", &RequestContext::default()).await;
        assert_eq!(decision.intent_category, IntentCategory::Unknown);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(decision.layer_used, crate::types::Layer::Llm);
    }
}
