//! C1 PatternMatcher: the compiled-regex tier (§4.1). Grounded in the
//! teacher's `complexity.rs` pattern-classifier style — regexes compiled
//! once at construction, never per call.

use crate::error::{Error, Result};
use crate::rules::PatternRuleDef;
use crate::types::{IntentCategory, Layer, RequestContext};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::str::FromStr;

use super::{TierClassifier, TierOutcome};

struct CompiledRule {
    id: String,
    category: IntentCategory,
    sub_intent: String,
    priority: i32,
    base_confidence: f64,
    patterns: Vec<Regex>,
}

/// Result of a single `match_text` call (§3 PatternRule, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub category: IntentCategory,
    pub sub_intent: String,
    pub base_confidence: f64,
    pub covered_span_ratio: f64,
    pub confidence: f64,
}

/// Compiled-regex classification tier. Evaluation is O(rules × patterns),
/// no allocation of compiled regexes per call (§4.1 performance contract).
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
    threshold: f64,
}

impl PatternMatcher {
    /// Compiles every rule's patterns up front. Rejects invalid regex or a
    /// duplicate `id` as a fatal configuration error (§4.1).
    pub fn load(defs: Vec<PatternRuleDef>, threshold: f64) -> Result<Self> {
        let mut seen_ids = HashSet::with_capacity(defs.len());
        let mut rules = Vec::with_capacity(defs.len());
        for def in defs {
            if !seen_ids.insert(def.id.clone()) {
                return Err(Error::config(format!(
                    "duplicate pattern rule id: {}",
                    def.id
                )));
            }
            let category = IntentCategory::from_str(&def.category)?;
            let mut patterns = Vec::with_capacity(def.patterns.len());
            for raw in &def.patterns {
                patterns.push(RegexBuilder::new(raw).case_insensitive(true).build()?);
            }
            rules.push(CompiledRule {
                id: def.id,
                category,
                sub_intent: def.sub_intent,
                priority: def.priority,
                base_confidence: def.base_confidence,
                patterns,
            });
        }
        Ok(Self { rules, threshold })
    }

    /// Confidence = weighted average of `base_confidence` (0.5), character
    /// coverage of the winning match (0.3), and a start-of-text bonus
    /// (0.2) — §4.1.
    pub fn match_text(&self, text: &str) -> Option<MatchResult> {
        let total_chars = text.chars().count().max(1) as f64;
        let mut best: Option<(&CompiledRule, usize, usize)> = None;

        for rule in &self.rules {
            let Some(m) = rule.patterns.iter().find_map(|p| p.find(text)) else {
                continue;
            };
            let start_chars = text[..m.start()].chars().count();
            let len_chars = text[m.start()..m.end()].chars().count();

            let replace = match best {
                None => true,
                Some((current, ..)) => {
                    // §4.1: highest (priority, base_confidence, -id) wins, so on an
                    // exact tie the *lowest* id wins — Reverse flips the id compare.
                    (rule.priority, rule.base_confidence, std::cmp::Reverse(&rule.id))
                        > (current.priority, current.base_confidence, std::cmp::Reverse(&current.id))
                }
            };
            if replace {
                best = Some((rule, start_chars, len_chars));
            }
        }

        best.map(|(rule, start_chars, len_chars)| {
            let coverage = (len_chars as f64 / total_chars).min(1.0);
            let position_bonus = if start_chars == 0 { 1.0 } else { 0.7 };
            let confidence = rule.base_confidence * 0.5 + coverage * 0.3 + position_bonus * 0.2;
            MatchResult {
                category: rule.category,
                sub_intent: rule.sub_intent.clone(),
                base_confidence: rule.base_confidence,
                covered_span_ratio: coverage,
                confidence,
            }
        })
    }
}

#[async_trait]
impl TierClassifier for PatternMatcher {
    fn layer(&self) -> Layer {
        Layer::Pattern
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn try_classify(&self, text: &str, _context: &RequestContext) -> Option<TierOutcome> {
        self.match_text(text).map(|m| TierOutcome {
            category: m.category,
            sub_intent: m.sub_intent,
            confidence: m.confidence,
            layer: Layer::Pattern,
            missing_fields_hint: vec![],
        })
    }
}
