//! C7 InputGateway + SourceHandlers (§4.7): picks a handler by webhook
//! header, then by explicit `source_type`, then falls back to user text.
//! System sources never touch the semantic or LLM tiers.

pub mod prometheus;
pub mod servicenow;
pub mod user;
pub mod validation;

pub use prometheus::PrometheusHandler;
pub use servicenow::ServiceNowHandler;
pub use user::UserInputHandler;

use crate::config::RuleSnapshot;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::router::IntentRouter;
use crate::tiers::PatternMatcher;
use crate::types::{RequestContext, RoutingDecision, SourceType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const SERVICENOW_WEBHOOK_HEADER: &str = "x-servicenow-webhook";
const PROMETHEUS_WEBHOOK_HEADER: &str = "x-prometheus-alertmanager";

/// A single inbound request, already stripped of whatever transport
/// carried it (§1 Out-of-scope: HTTP itself is not this crate's job).
/// Exactly one of `body` (system sources) or `text` (user source) is
/// expected to be populated, matching the handler that will consume it.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HashMap<String, String>,
    pub source_type: Option<SourceType>,
    pub text: Option<String>,
    pub body: Option<Value>,
    pub context: RequestContext,
}

impl InboundRequest {
    pub fn user(text: impl Into<String>, context: RequestContext) -> Self {
        Self {
            text: Some(text.into()),
            context,
            ..Default::default()
        }
    }

    pub fn system(source_type: SourceType, body: Value) -> Self {
        Self {
            source_type: Some(source_type),
            body: Some(body),
            ..Default::default()
        }
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Dispatches an `InboundRequest` to the handler for its source (§4.7
/// step order: header → explicit `source_type` → `UserInputHandler`).
pub struct InputGateway {
    servicenow: ServiceNowHandler,
    prometheus: PrometheusHandler,
    user: UserInputHandler,
    metrics: Metrics,
}

impl InputGateway {
    pub fn new(
        servicenow: ServiceNowHandler,
        prometheus: PrometheusHandler,
        user: UserInputHandler,
        metrics: Metrics,
    ) -> Self {
        Self {
            servicenow,
            prometheus,
            user,
            metrics,
        }
    }

    /// Builds the wired gateway from a loaded `RuleSnapshot` and the
    /// `IntentRouter` an earlier `IntentRouter::from_snapshot` call built
    /// from it (§4.7, §6.1). `ServiceNowHandler`'s fallback path needs its
    /// own compiled `PatternMatcher` over the same `pattern_rules` (§4.7
    /// "on miss, falls back to `PatternMatcher::match` on the ticket's
    /// `short_description`"), separate from the one inside `IntentRouter`
    /// since C7's fallback never goes through the full cascade.
    pub fn from_snapshot(
        snapshot: &RuleSnapshot,
        router: Arc<IntentRouter>,
        pattern_threshold: f64,
        metrics: Metrics,
    ) -> Result<Self> {
        let fallback_pattern = PatternMatcher::load(snapshot.pattern_rules.clone(), pattern_threshold)?;
        let fallback_completeness = router.completeness().clone();
        let servicenow = ServiceNowHandler::new(fallback_pattern, fallback_completeness);
        let prometheus = PrometheusHandler::new();
        let user = UserInputHandler::new(router);
        Ok(Self::new(servicenow, prometheus, user, metrics))
    }

    pub async fn process(&self, request: &InboundRequest) -> Result<RoutingDecision> {
        if request.has_header(SERVICENOW_WEBHOOK_HEADER) || request.source_type == Some(SourceType::ServiceNow) {
            return self.dispatch_servicenow(request);
        }
        if request.has_header(PROMETHEUS_WEBHOOK_HEADER) || request.source_type == Some(SourceType::Prometheus) {
            return self.dispatch_prometheus(request);
        }

        let text = request.text.as_deref().unwrap_or_default();
        Ok(self.user.handle(text, &request.context).await)
    }

    fn dispatch_servicenow(&self, request: &InboundRequest) -> Result<RoutingDecision> {
        self.metrics.inc_system_source_requests("servicenow");
        let body = request.body.clone().unwrap_or(Value::Null);
        self.servicenow.handle(&body)
    }

    fn dispatch_prometheus(&self, request: &InboundRequest) -> Result<RoutingDecision> {
        self.metrics.inc_system_source_requests("prometheus");
        let body = request.body.clone().unwrap_or(Value::Null);
        self.prometheus.handle(&body)
    }
}
