//! Runtime configuration (§10): plain builder structs with `Default`
//! impls, the same convention the teacher uses for `ClientConfig`, plus
//! the immutable rule-table snapshot that `IntentRouter` reads from and
//! a config reload swaps atomically (§5).

use crate::rules::{
    CompletenessRuleDef, PatternRuleDef, QuestionTemplateDef, RefinementRuleDef, SemanticRouteDef,
};
use crate::types::IntentCategory;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the C5 coordinator: per-tier thresholds and the LLM call
/// budget. Defaults match §4.5/§4.1-4.3.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub pattern_threshold: f64,
    pub semantic_threshold: f64,
    pub llm_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 0.90,
            semantic_threshold: 0.85,
            llm_timeout: Duration::from_secs(2),
        }
    }
}

impl RouterConfig {
    pub fn with_pattern_threshold(mut self, threshold: f64) -> Self {
        self.pattern_threshold = threshold;
        self
    }

    pub fn with_semantic_threshold(mut self, threshold: f64) -> Self {
        self.semantic_threshold = threshold;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }
}

/// Tunables for C6 `GuidedDialogEngine`: idle TTL and retry policy on a
/// CAS conflict (§4.6, §5, §7).
#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub idle_timeout: Duration,
    pub cas_retry_attempts: u32,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            cas_retry_attempts: 1,
        }
    }
}

impl DialogConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_cas_retry_attempts(mut self, attempts: u32) -> Self {
        self.cas_retry_attempts = attempts;
        self
    }
}

/// Tunables for C8 `HITLController`: default approval TTL, escalation
/// cap, and sweep interval (§4.8, §5).
#[derive(Debug, Clone)]
pub struct HitlConfig {
    pub approval_ttl: Duration,
    pub escalation_cap: u32,
    pub sweep_interval: Duration,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            approval_ttl: Duration::from_secs(60 * 60),
            // DESIGN.md Open Question (b): treated as global, not per-category.
            escalation_cap: 2,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl HitlConfig {
    pub fn with_approval_ttl(mut self, ttl: Duration) -> Self {
        self.approval_ttl = ttl;
        self
    }

    pub fn with_escalation_cap(mut self, cap: u32) -> Self {
        self.escalation_cap = cap;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Tunables shared by every `CheckpointStore` backend.
#[derive(Debug, Clone, Default)]
pub struct CheckpointConfig {
    pub default_ttl: Option<Duration>,
}

/// Everything loaded from rule files at startup, bundled so a config
/// reload swaps it as one unit (§5, §10). Held behind an `ArcSwap` by
/// `RuleSnapshotHandle`; `IntentRouter` and friends are built once per
/// snapshot and an in-flight request keeps using the snapshot it started
/// with even if a reload happens mid-flight.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub pattern_rules: Vec<PatternRuleDef>,
    pub semantic_routes: Vec<SemanticRouteDef>,
    pub completeness_rules: Vec<CompletenessRuleDef>,
    pub refinement_rules: Vec<RefinementRuleDef>,
    pub question_templates: Vec<QuestionTemplateDef>,
}

impl RuleSnapshot {
    /// Every `(category, sub_intent)` pair named anywhere in the snapshot,
    /// deduplicated and order-preserving. This is the closed vocabulary
    /// `LLMClassifier::build_prompt` advertises to the provider and
    /// validates its response against (§4.3, §6.1) — it is derived from
    /// the same rule files the pattern/semantic tiers and completeness
    /// checker compile, so every tier stays in agreement about what a
    /// valid `(category, sub_intent)` is.
    pub fn allowed_llm_pairs(&self) -> crate::error::Result<Vec<(IntentCategory, String)>> {
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        let mut push = |category: &str, sub_intent: &str| -> crate::error::Result<()> {
            let category = IntentCategory::from_str(category)?;
            let key = (category, sub_intent.to_string());
            if seen.insert(key.clone()) {
                pairs.push(key);
            }
            Ok(())
        };
        for rule in &self.pattern_rules {
            push(&rule.category, &rule.sub_intent)?;
        }
        for route in &self.semantic_routes {
            push(&route.category, &route.sub_intent)?;
        }
        for rule in &self.completeness_rules {
            if let Some(sub_intent) = &rule.sub_intent {
                push(&rule.category, sub_intent)?;
            }
        }
        Ok(pairs)
    }
}

/// Atomically-swappable handle over the current `RuleSnapshot` (§5, §9
/// "no global mutable state"). A reload builds a new `RuleSnapshot` and
/// calls `swap`; readers that already hold a `load()`'d `Arc` keep
/// reading the old data until they re-load.
#[derive(Debug)]
pub struct RuleSnapshotHandle {
    current: ArcSwap<RuleSnapshot>,
}

impl RuleSnapshotHandle {
    pub fn new(snapshot: RuleSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Atomically replaces the snapshot; in-flight requests that already
    /// called `load()` are unaffected (§5).
    pub fn swap(&self, snapshot: RuleSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}
