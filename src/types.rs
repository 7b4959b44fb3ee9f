//! Shared data model (§3): the closed enums and the `RoutingDecision` that
//! flows out of every component in the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse IT intent. Closed set per §3 — an `Unknown` bucket absorbs
/// anything the LLM tier returns outside the vocabulary (§4.3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Incident,
    Request,
    Change,
    Query,
    Unknown,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Request => "request",
            Self::Change => "change",
            Self::Query => "query",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for IntentCategory {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incident" => Ok(Self::Incident),
            "request" => Ok(Self::Request),
            "change" => Ok(Self::Change),
            "query" => Ok(Self::Query),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::error::Error::config(format!(
                "unknown intent category: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// §3 RiskLevel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// §3 WorkflowType — a hint for downstream executors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Simple,
    Sequential,
    Concurrent,
    Handoff,
    Magentic,
}

/// §3 SourceType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    User,
    ServiceNow,
    Prometheus,
    Other,
}

/// Which classification layer produced a `RoutingDecision` (§3, §4.5, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Pattern,
    Semantic,
    Llm,
    ServiceNowMapping,
    PrometheusMapping,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Semantic => "semantic",
            Self::Llm => "llm",
            Self::ServiceNowMapping => "servicenow_mapping",
            Self::PrometheusMapping => "prometheus_mapping",
        }
    }
}

/// §3 CompletenessInfo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessInfo {
    pub score: f64,
    pub threshold: f64,
    pub missing_fields: Vec<String>,
}

impl CompletenessInfo {
    pub fn is_sufficient(&self) -> bool {
        self.score >= self.threshold
    }

    /// A trivially-complete result, used by ServiceNow mapping hits (§4.7)
    /// and any other source that already carries every required field.
    pub fn complete() -> Self {
        Self {
            score: 1.0,
            threshold: 1.0,
            missing_fields: Vec::new(),
        }
    }
}

/// §3 RoutingDecision — immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub intent_category: IntentCategory,
    pub sub_intent: String,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub workflow_type: WorkflowType,
    pub layer_used: Layer,
    pub completeness: CompletenessInfo,
    pub extracted_fields: HashMap<String, serde_json::Value>,
    pub latency_ms: u64,
    pub raw_input: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RoutingDecision {
    pub fn is_sufficient(&self) -> bool {
        self.completeness.is_sufficient()
    }
}

/// Context accompanying a classification/risk request (§4.3, §4.8).
/// Distinct from `DialogSession` state — this is per-call, not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub environment: Option<String>,
    pub is_weekend: bool,
    pub is_urgent: bool,
    pub extra: HashMap<String, serde_json::Value>,
}

/// A field value extracted by a `FieldDefinition`'s extractors (§3, §4.4).
pub type ExtractedFields = HashMap<String, serde_json::Value>;

/// Timestamp helper matching the teacher's `chrono::Utc::now()` convention.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completeness_is_sufficient_boundary() {
        let info = CompletenessInfo {
            score: 0.6,
            threshold: 0.6,
            missing_fields: vec![],
        };
        assert!(info.is_sufficient());

        let info = CompletenessInfo {
            score: 0.59,
            threshold: 0.6,
            missing_fields: vec!["x".into()],
        };
        assert!(!info.is_sufficient());
    }

    #[test]
    fn intent_category_round_trips_through_str() {
        use std::str::FromStr;
        for cat in [
            IntentCategory::Incident,
            IntentCategory::Request,
            IntentCategory::Change,
            IntentCategory::Query,
            IntentCategory::Unknown,
        ] {
            assert_eq!(IntentCategory::from_str(cat.as_str()).unwrap(), cat);
        }
    }
}
