//! ServiceNowHandler (§4.7): a declarative `"{category}/{subcategory}"`
//! lookup table. A hit emits a trivially-complete decision without ever
//! touching the semantic or LLM tiers; a miss falls through to
//! `PatternMatcher::match_text` on `short_description` only.

use crate::completeness::CompletenessChecker;
use crate::error::{Error, Result};
use crate::gateway::validation::{FieldSchema, RequestSchema};
use crate::router::{baseline_risk, workflow_for};
use crate::tiers::PatternMatcher;
use crate::types::{CompletenessInfo, IntentCategory, Layer, RiskLevel, RoutingDecision};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// `(category, subcategory)` → `(intent_category, sub_intent)`. Twelve
/// entries across incident/request/change, the shape described in §4.7 —
/// a real deployment would load this from the same rule-file pipeline as
/// C1/C2, but the table itself is orthogonal to that mechanism so it's
/// kept as a plain literal here.
fn default_mapping_table() -> HashMap<(&'static str, &'static str), (IntentCategory, &'static str)> {
    use IntentCategory::*;
    HashMap::from([
        (("incident", "database"), (Incident, "database_issue")),
        (("incident", "network"), (Incident, "network_outage")),
        (("incident", "application"), (Incident, "application_error")),
        (("incident", "infrastructure"), (Incident, "infrastructure_failure")),
        (("incident", "security"), (Incident, "security_incident")),
        (("request", "access"), (Request, "account_request")),
        (("request", "software"), (Request, "software_install")),
        (("request", "hardware"), (Request, "hardware_request")),
        (("request", "access_review"), (Request, "access_review")),
        (("change", "deployment"), (Change, "release_deployment")),
        (("change", "configuration"), (Change, "configuration_change")),
        (("change", "emergency"), (Change, "emergency_change")),
    ])
}

fn request_schema() -> RequestSchema {
    RequestSchema::new(vec![
        FieldSchema {
            key: "category".into(),
            required: true,
            nested_required: vec![],
        },
        FieldSchema {
            key: "subcategory".into(),
            required: true,
            nested_required: vec![],
        },
        FieldSchema {
            key: "short_description".into(),
            required: true,
            nested_required: vec![],
        },
    ])
}

/// ServiceNow priority 1 (highest) through 5 (lowest/planning), the
/// field's native convention. Resolves DESIGN.md Open Question (a): an
/// explicit ServiceNow `priority` overrides the category baseline risk
/// rather than the other way around, since the ticketing system's triage
/// is the more current signal for that specific request.
fn risk_from_priority(priority: i64) -> Option<RiskLevel> {
    match priority {
        1 => Some(RiskLevel::Critical),
        2 => Some(RiskLevel::High),
        3 => Some(RiskLevel::Medium),
        4 | 5 => Some(RiskLevel::Low),
        _ => None,
    }
}

pub struct ServiceNowHandler {
    table: HashMap<(&'static str, &'static str), (IntentCategory, &'static str)>,
    schema: RequestSchema,
    pattern: PatternMatcher,
    completeness: Arc<CompletenessChecker>,
}

impl ServiceNowHandler {
    /// `completeness` is the same checker `IntentRouter` runs its own
    /// cascade through (`IntentRouter::completeness`), so a ServiceNow
    /// ticket that falls through to the pattern tier is held to the same
    /// required-field bar as a user-text request classified by that tier
    /// (§4.7, §4.4) — a mapping-table miss is not exempt from C4.
    pub fn new(pattern: PatternMatcher, completeness: Arc<CompletenessChecker>) -> Self {
        Self {
            table: default_mapping_table(),
            schema: request_schema(),
            pattern,
            completeness,
        }
    }

    pub fn handle(&self, body: &Value) -> Result<RoutingDecision> {
        let start = Instant::now();
        self.schema.validate(body).map_err(Error::Validation)?;

        let category_raw = body["category"].as_str().unwrap_or_default();
        let subcategory_raw = body["subcategory"].as_str().unwrap_or_default();
        let short_description = body["short_description"].as_str().unwrap_or_default();
        let priority = body.get("priority").and_then(Value::as_i64);

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), Value::String("servicenow".to_string()));
        if let Some(priority) = priority {
            metadata.insert("priority".to_string(), Value::from(priority));
        }

        if let Some((category, sub_intent)) = self
            .table
            .get(&(category_raw.to_ascii_lowercase().as_str(), subcategory_raw.to_ascii_lowercase().as_str()))
            .copied()
        {
            let risk_level = priority
                .and_then(risk_from_priority)
                .unwrap_or_else(|| baseline_risk(category));
            return Ok(RoutingDecision {
                intent_category: category,
                sub_intent: sub_intent.to_string(),
                confidence: 1.0,
                risk_level,
                workflow_type: workflow_for(category, sub_intent),
                layer_used: Layer::ServiceNowMapping,
                completeness: CompletenessInfo::complete(),
                extracted_fields: HashMap::new(),
                latency_ms: start.elapsed().as_millis() as u64,
                raw_input: short_description.to_string(),
                metadata,
            });
        }

        tracing::debug!(category_raw, subcategory_raw, "servicenow mapping miss, falling back to pattern tier");
        let fallback = self.pattern.match_text(short_description);
        let (category, sub_intent, confidence) = match fallback {
            Some(m) => (m.category, m.sub_intent, m.confidence),
            None => (IntentCategory::Unknown, "general".to_string(), 0.0),
        };
        let risk_level = priority
            .and_then(risk_from_priority)
            .unwrap_or_else(|| baseline_risk(category));

        let mut extracted_fields = HashMap::new();
        let completeness = self.completeness.check(
            category,
            &sub_intent,
            &mut extracted_fields,
            short_description,
        );

        Ok(RoutingDecision {
            intent_category: category,
            sub_intent: sub_intent.clone(),
            confidence,
            risk_level,
            workflow_type: workflow_for(category, &sub_intent),
            layer_used: Layer::Pattern,
            completeness,
            extracted_fields,
            latency_ms: start.elapsed().as_millis() as u64,
            raw_input: short_description.to_string(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> ServiceNowHandler {
        ServiceNowHandler::new(
            PatternMatcher::load(vec![], 0.90).unwrap(),
            Arc::new(CompletenessChecker::load(vec![]).unwrap()),
        )
    }

    #[test]
    fn known_mapping_hit_is_trivially_complete() {
        let body = json!({
            "category": "incident",
            "subcategory": "database",
            "short_description": "Primary DB connection pool exhausted",
        });
        let decision = handler().handle(&body).unwrap();
        assert_eq!(decision.intent_category, IntentCategory::Incident);
        assert_eq!(decision.sub_intent, "database_issue");
        assert_eq!(decision.layer_used, Layer::ServiceNowMapping);
        assert!(decision.is_sufficient());
    }

    #[test]
    fn explicit_priority_overrides_category_baseline_risk() {
        let body = json!({
            "category": "request",
            "subcategory": "access",
            "short_description": "New starter needs a laptop",
            "priority": 1,
        });
        let decision = handler().handle(&body).unwrap();
        assert_eq!(decision.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn unknown_mapping_falls_through_to_pattern_matcher_never_llm() {
        let body = json!({
            "category": "incident",
            "subcategory": "unmapped_bucket",
            "short_description": "something odd happened",
        });
        let decision = handler().handle(&body).unwrap();
        assert_eq!(decision.intent_category, IntentCategory::Unknown);
        assert_eq!(decision.layer_used, Layer::Pattern);
    }

    #[test]
    fn missing_required_field_is_a_validation_error() {
        let body = json!({"category": "incident"});
        let err = handler().handle(&body).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn fallback_path_runs_real_completeness_instead_of_forcing_sufficient() {
        use crate::rules::{CompletenessRuleDef, ExtractorDef, FieldDef};

        let completeness = Arc::new(
            CompletenessChecker::load(vec![CompletenessRuleDef {
                category: "incident".into(),
                sub_intent: Some("database_issue".into()),
                required_fields: vec![FieldDef {
                    key: "affected_host".into(),
                    extractors: vec![ExtractorDef::Regex {
                        pattern: r"host:\s*(\S+)".into(),
                    }],
                }],
                optional_fields: vec![],
                threshold: 0.99,
            }])
            .unwrap(),
        );
        let pattern = PatternMatcher::load(
            vec![crate::rules::PatternRuleDef {
                id: "db".into(),
                category: "incident".into(),
                sub_intent: "database_issue".into(),
                priority: 100,
                base_confidence: 0.95,
                patterns: vec![r"(?i)db pool exhausted".into()],
            }],
            0.90,
        )
        .unwrap();
        let handler = ServiceNowHandler::new(pattern, completeness);

        let body = json!({
            "category": "incident",
            "subcategory": "unmapped_bucket",
            "short_description": "db pool exhausted, no host given",
        });
        let decision = handler.handle(&body).unwrap();
        assert_eq!(decision.layer_used, Layer::Pattern);
        assert!(
            !decision.is_sufficient(),
            "fallback-path miss on a required field must not be reported sufficient"
        );
        assert_eq!(decision.completeness.missing_fields, vec!["affected_host".to_string()]);
    }
}
