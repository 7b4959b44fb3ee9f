//! # intent-orchestration-core
//!
//! A deterministic, tiered request-classification and guided-dialog
//! pipeline for IT service requests: a three-layer classification
//! cascade (pattern → semantic → LLM), multi-turn dialog with
//! incremental field accumulation, source-aware short-circuit paths for
//! ticketing/alerting webhooks, and risk-gated human-in-the-loop
//! approval — all backed by a single pluggable checkpoint substrate.
//!
//! ## Core components
//!
//! - **tiers**: `PatternMatcher`, `SemanticRouter`, `LLMClassifier` — the
//!   classification cascade.
//! - **router**: `IntentRouter`, the coordinator that runs the cascade
//!   and fills in completeness/risk/workflow.
//! - **dialog**: `GuidedDialogEngine`, stateful multi-turn refinement.
//! - **gateway**: `InputGateway`, source-aware dispatch for ServiceNow,
//!   Prometheus, and free-text user input.
//! - **risk** / **hitl**: `RiskAssessor` and `HITLController`, the
//!   approval state machine.
//! - **checkpoint**: `CheckpointStore`, the pluggable state substrate
//!   behind dialog sessions and approval requests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use intent_orchestration_core::router::IntentRouter;
//! use intent_orchestration_core::types::RequestContext;
//!
//! let decision = router.route("ETL job failed overnight", &RequestContext::default()).await;
//! if decision.is_sufficient() {
//!     println!("{:?} / {}", decision.intent_category, decision.sub_intent);
//! }
//! ```

pub mod checkpoint;
pub mod completeness;
pub mod config;
pub mod dialog;
pub mod error;
pub mod gateway;
pub mod hitl;
pub mod metrics;
pub mod risk;
pub mod router;
pub mod rules;
pub mod tiers;
pub mod types;

pub use checkpoint::{CasOutcome, CheckpointStore, Version};
pub use completeness::CompletenessChecker;
pub use config::{CheckpointConfig, DialogConfig, HitlConfig, RouterConfig, RuleSnapshot, RuleSnapshotHandle};
pub use dialog::{DialogResponse, DialogSession, GuidedDialogEngine, Question, QuestionGenerator};
pub use error::{Error, Result};
pub use gateway::{InboundRequest, InputGateway, PrometheusHandler, ServiceNowHandler, UserInputHandler};
pub use hitl::{ApprovalRequest, ApprovalStatus, DeliveryResult, HITLController, Notifier};
pub use metrics::Metrics;
pub use risk::{RiskAssessment, RiskAssessor, RiskFactor};
pub use router::IntentRouter;
pub use tiers::{LLMClassifier, PatternMatcher, SemanticRouter, TierClassifier};
pub use types::{
    CompletenessInfo, ExtractedFields, IntentCategory, Layer, RequestContext, RiskLevel,
    RoutingDecision, SourceType, WorkflowType,
};
