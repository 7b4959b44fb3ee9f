//! PrometheusHandler (§4.7): an ordered `alertname` regex list, first
//! match wins. Severity maps straight to risk; labels ride along in
//! `metadata` for downstream executors.

use crate::error::{Error, Result};
use crate::gateway::validation::{FieldSchema, RequestSchema};
use crate::router::workflow_for;
use crate::types::{CompletenessInfo, IntentCategory, Layer, RiskLevel, RoutingDecision};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

struct AlertRoute {
    alertname_pattern: Regex,
    category: IntentCategory,
    sub_intent: &'static str,
}

fn default_routes() -> Vec<AlertRoute> {
    let compile = |pattern: &str| Regex::new(pattern).expect("built-in alert route pattern is valid");
    vec![
        AlertRoute {
            alertname_pattern: compile(r"(?i)^(HostDown|InstanceDown)"),
            category: IntentCategory::Incident,
            sub_intent: "system_unavailable",
        },
        AlertRoute {
            alertname_pattern: compile(r"(?i)HighCPU|CPUThrottling"),
            category: IntentCategory::Incident,
            sub_intent: "resource_saturation",
        },
        AlertRoute {
            alertname_pattern: compile(r"(?i)DiskSpace|DiskFull"),
            category: IntentCategory::Incident,
            sub_intent: "disk_capacity",
        },
        AlertRoute {
            alertname_pattern: compile(r"(?i)CertificateExpir"),
            category: IntentCategory::Change,
            sub_intent: "certificate_renewal",
        },
        AlertRoute {
            alertname_pattern: compile(r"(?i)^Watchdog$"),
            category: IntentCategory::Query,
            sub_intent: "heartbeat_check",
        },
    ]
}

fn risk_from_severity(severity: &str) -> RiskLevel {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => RiskLevel::Critical,
        "warning" => RiskLevel::High,
        "info" => RiskLevel::Medium,
        _ => RiskLevel::Medium,
    }
}

fn request_schema() -> RequestSchema {
    RequestSchema::new(vec![FieldSchema {
        key: "alerts".into(),
        required: true,
        nested_required: vec!["labels".into(), "status".into()],
    }])
}

pub struct PrometheusHandler {
    routes: Vec<AlertRoute>,
    schema: RequestSchema,
}

impl PrometheusHandler {
    pub fn new() -> Self {
        Self {
            routes: default_routes(),
            schema: request_schema(),
        }
    }

    /// Alertmanager batches alerts; this handler routes the first firing
    /// alert in the batch, consistent with the single-`RoutingDecision`
    /// contract every other handler returns.
    pub fn handle(&self, body: &Value) -> Result<RoutingDecision> {
        let start = Instant::now();
        self.schema.validate(body).map_err(Error::Validation)?;

        let alerts = body["alerts"].as_array().cloned().unwrap_or_default();
        let Some(alert) = alerts.first() else {
            return Err(Error::validation("alertmanager payload has no alerts"));
        };

        let labels = alert.get("labels").cloned().unwrap_or(Value::Null);
        let alertname = labels["alertname"].as_str().unwrap_or_default();
        let severity = labels["severity"].as_str().unwrap_or("warning");

        let matched = self
            .routes
            .iter()
            .find(|route| route.alertname_pattern.is_match(alertname));

        let (category, sub_intent) = match matched {
            Some(route) => (route.category, route.sub_intent.to_string()),
            None => (IntentCategory::Unknown, "unmapped_alert".to_string()),
        };

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), Value::String("prometheus".to_string()));
        if let Value::Object(label_map) = &labels {
            for (key, value) in label_map {
                metadata.insert(format!("label.{key}"), value.clone());
            }
        }

        tracing::debug!(alertname, severity, %category, sub_intent, "prometheus alert routed");

        Ok(RoutingDecision {
            intent_category: category,
            sub_intent: sub_intent.clone(),
            confidence: if matched.is_some() { 1.0 } else { 0.0 },
            risk_level: risk_from_severity(severity),
            workflow_type: workflow_for(category, &sub_intent),
            layer_used: Layer::PrometheusMapping,
            completeness: CompletenessInfo::complete(),
            extracted_fields: HashMap::new(),
            latency_ms: start.elapsed().as_millis() as u64,
            raw_input: alertname.to_string(),
            metadata,
        })
    }
}

impl Default for PrometheusHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_down_maps_to_system_unavailable_with_critical_risk() {
        let body = json!({
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "InstanceDown", "severity": "critical", "instance": "db-1"},
            }]
        });
        let decision = PrometheusHandler::new().handle(&body).unwrap();
        assert_eq!(decision.intent_category, IntentCategory::Incident);
        assert_eq!(decision.sub_intent, "system_unavailable");
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert_eq!(decision.metadata["label.instance"], "db-1");
    }

    #[test]
    fn warning_severity_maps_to_high_risk() {
        let body = json!({
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "HighCPUUsage", "severity": "warning"},
            }]
        });
        let decision = PrometheusHandler::new().handle(&body).unwrap();
        assert_eq!(decision.risk_level, RiskLevel::High);
    }

    #[test]
    fn unmatched_alertname_is_unknown_but_still_bypasses_llm() {
        let body = json!({
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "SomeCustomAlert", "severity": "info"},
            }]
        });
        let decision = PrometheusHandler::new().handle(&body).unwrap();
        assert_eq!(decision.intent_category, IntentCategory::Unknown);
        assert_eq!(decision.layer_used, Layer::PrometheusMapping);
    }

    #[test]
    fn missing_alerts_field_is_a_validation_error() {
        let err = PrometheusHandler::new().handle(&json!({})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
