//! YAML rule-file parsing (§6.1). These are the *declarative* shapes as
//! they appear on disk; each tier/checker compiles them into its own
//! runtime representation (e.g. `tiers::pattern::PatternMatcher` compiles
//! `PatternRuleDef::patterns` into `Regex`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Raw pattern rule as read from YAML (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRuleDef {
    pub id: String,
    pub category: String,
    pub sub_intent: String,
    pub priority: i32,
    pub base_confidence: f64,
    pub patterns: Vec<String>,
}

/// Raw semantic route as read from YAML — same shape as a pattern rule,
/// with exactly 5 example utterances instead of regex patterns (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRouteDef {
    pub id: String,
    pub category: String,
    pub sub_intent: String,
    pub utterances: Vec<String>,
}

/// One field extractor: either a regex with a capture group, or a set of
/// keywords whose presence alone satisfies the field (§3 FieldDefinition).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorDef {
    Regex { pattern: String },
    Keywords { values: Vec<String> },
}

/// A single required/optional field within a `CompletenessRuleDef`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub key: String,
    #[serde(default)]
    pub extractors: Vec<ExtractorDef>,
}

/// Raw completeness rule, keyed by `(category, sub_intent?)` — §3 CompletenessRule,
/// §4.4. A rule with `sub_intent: None` is a category-level default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessRuleDef {
    pub category: String,
    #[serde(default)]
    pub sub_intent: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<FieldDef>,
    #[serde(default)]
    pub optional_fields: Vec<FieldDef>,
    pub threshold: f64,
}

/// A single refinement condition: a conjunction collapses to a `Vec` of
/// these, all of which must hold (§3 RefinementRule).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConditionDef {
    Equals { field: String, value: String },
    Contains { field: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementBranchDef {
    #[serde(default)]
    pub conditions: Vec<ConditionDef>,
    pub target_sub_intent: String,
}

/// Raw refinement rule for one `from_sub_intent`, listing branches to try
/// in order; the first fully-satisfied branch wins (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRuleDef {
    pub from_sub_intent: String,
    pub branches: Vec<RefinementBranchDef>,
}

/// One question template, keyed by the field it asks about (§4.6 QuestionGenerator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTemplateDef {
    pub field_key: String,
    pub template: String,
}

pub fn parse_pattern_rules(yaml: &str) -> Result<Vec<PatternRuleDef>> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn parse_semantic_routes(yaml: &str) -> Result<Vec<SemanticRouteDef>> {
    let routes: Vec<SemanticRouteDef> = serde_yaml::from_str(yaml)?;
    for route in &routes {
        if route.utterances.len() != 5 {
            return Err(Error::config(format!(
                "semantic route {} must have exactly 5 utterances, got {}",
                route.id,
                route.utterances.len()
            )));
        }
    }
    Ok(routes)
}

pub fn parse_completeness_rules(yaml: &str) -> Result<Vec<CompletenessRuleDef>> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn parse_refinement_rules(yaml: &str) -> Result<Vec<RefinementRuleDef>> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn parse_question_templates(yaml: &str) -> Result<Vec<QuestionTemplateDef>> {
    Ok(serde_yaml::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pattern_rule_yaml() {
        let yaml = r#"
- id: etl_failure
  category: incident
  sub_intent: etl_failure
  priority: 100
  base_confidence: 0.95
  patterns:
    - "\\bETL\\b.*(failed|error|abort)"
    - "pipeline.*(stuck|hung)"
"#;
        let rules = parse_pattern_rules(yaml).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "etl_failure");
        assert_eq!(rules[0].patterns.len(), 2);
    }

    #[test]
    fn rejects_semantic_route_with_wrong_utterance_count() {
        let yaml = r#"
- id: route_a
  category: query
  sub_intent: status_check
  utterances: ["a", "b"]
"#;
        let err = parse_semantic_routes(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
