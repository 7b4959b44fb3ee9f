//! C4 CompletenessChecker (§4.4): given a category/sub_intent and the
//! fields already extracted, determines what's still missing and runs
//! pure regex/keyword extraction against the raw input to try to fill
//! the gaps. Never calls the LLM.

use crate::rules::{CompletenessRuleDef, ExtractorDef, FieldDef};
use crate::types::{CompletenessInfo, IntentCategory};
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

enum CompiledExtractor {
    Regex(Regex),
    Keywords(Vec<String>),
}

struct CompiledField {
    key: String,
    extractors: Vec<CompiledExtractor>,
}

struct CompiledRule {
    category: IntentCategory,
    sub_intent: Option<String>,
    required_fields: Vec<CompiledField>,
    threshold: f64,
}

/// Computes `CompletenessInfo` deterministically: identical inputs and
/// rules always produce byte-identical output (§4.4).
pub struct CompletenessChecker {
    rules: Vec<CompiledRule>,
}

fn category_default_threshold(category: IntentCategory) -> f64 {
    match category {
        IntentCategory::Incident => 0.60,
        IntentCategory::Request => 0.60,
        IntentCategory::Change => 0.70,
        IntentCategory::Query => 0.50,
        IntentCategory::Unknown => 0.50,
    }
}

fn compile_field(def: &FieldDef) -> crate::error::Result<CompiledField> {
    let mut extractors = Vec::with_capacity(def.extractors.len());
    for extractor in &def.extractors {
        extractors.push(match extractor {
            ExtractorDef::Regex { pattern } => CompiledExtractor::Regex(Regex::new(pattern)?),
            ExtractorDef::Keywords { values } => CompiledExtractor::Keywords(values.clone()),
        });
    }
    Ok(CompiledField {
        key: def.key.clone(),
        extractors,
    })
}

fn extract_field(field: &CompiledField, raw_input: &str) -> Option<serde_json::Value> {
    for extractor in &field.extractors {
        match extractor {
            CompiledExtractor::Regex(re) => {
                if let Some(captures) = re.captures(raw_input) {
                    let value = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str().to_string());
                    if let Some(value) = value {
                        return Some(serde_json::Value::String(value));
                    }
                }
            }
            CompiledExtractor::Keywords(keywords) => {
                let lower = raw_input.to_ascii_lowercase();
                if let Some(hit) = keywords
                    .iter()
                    .find(|kw| lower.contains(&kw.to_ascii_lowercase()))
                {
                    return Some(serde_json::Value::String(hit.clone()));
                }
            }
        }
    }
    None
}

impl CompletenessChecker {
    pub fn load(defs: Vec<CompletenessRuleDef>) -> crate::error::Result<Self> {
        let mut rules = Vec::with_capacity(defs.len());
        for def in defs {
            let category = IntentCategory::from_str(&def.category)?;
            let required_fields = def
                .required_fields
                .iter()
                .map(compile_field)
                .collect::<crate::error::Result<Vec<_>>>()?;
            rules.push(CompiledRule {
                category,
                sub_intent: def.sub_intent,
                required_fields,
                threshold: def.threshold,
            });
        }
        Ok(Self { rules })
    }

    /// Runs this `(category, sub_intent)`'s field extractors against
    /// `text`, returning whatever new values were found — without
    /// touching `score`/`missing_fields` bookkeeping. Used by
    /// `GuidedDialogEngine` (§4.6 step 2) to extract from a single dialog
    /// turn's text before merging into `accumulated_fields`.
    pub fn extract_fields_from_text(
        &self,
        category: IntentCategory,
        sub_intent: &str,
        text: &str,
    ) -> HashMap<String, serde_json::Value> {
        let mut found = HashMap::new();
        if let Some(rule) = self.resolve_rule(category, sub_intent) {
            for field in &rule.required_fields {
                if let Some(value) = extract_field(field, text) {
                    found.insert(field.key.clone(), value);
                }
            }
        }
        found
    }

    fn resolve_rule(&self, category: IntentCategory, sub_intent: &str) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .find(|r| r.category == category && r.sub_intent.as_deref() == Some(sub_intent))
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|r| r.category == category && r.sub_intent.is_none())
            })
    }

    /// Runs extraction against `raw_input` for any missing required field,
    /// mutating `extracted_fields` in place with anything newly found, and
    /// returns the resulting `CompletenessInfo` (§4.4).
    pub fn check(
        &self,
        category: IntentCategory,
        sub_intent: &str,
        extracted_fields: &mut HashMap<String, serde_json::Value>,
        raw_input: &str,
    ) -> CompletenessInfo {
        let Some(rule) = self.resolve_rule(category, sub_intent) else {
            tracing::warn!(
                %category,
                sub_intent,
                "no completeness rule for category/sub_intent, defaulting to sufficient"
            );
            return CompletenessInfo {
                score: 1.0,
                threshold: category_default_threshold(category),
                missing_fields: Vec::new(),
            };
        };

        if rule.required_fields.is_empty() {
            return CompletenessInfo {
                score: 1.0,
                threshold: rule.threshold,
                missing_fields: Vec::new(),
            };
        }

        let mut present = 0usize;
        let mut missing = Vec::new();
        for field in &rule.required_fields {
            if !extracted_fields.contains_key(&field.key) {
                if let Some(value) = extract_field(field, raw_input) {
                    extracted_fields.insert(field.key.clone(), value);
                }
            }
            if extracted_fields.contains_key(&field.key) {
                present += 1;
            } else {
                missing.push(field.key.clone());
            }
        }

        CompletenessInfo {
            score: present as f64 / rule.required_fields.len() as f64,
            threshold: rule.threshold,
            missing_fields: missing,
        }
    }
}
