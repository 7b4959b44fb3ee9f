//! C8b HITLController + Notifier (§4.8): the approval state machine with
//! TTL expiration and escalation, plus the `Notifier` trait the core
//! compiles against without any real transport (§9).

use crate::checkpoint::{CasOutcome, CheckpointStore};
use crate::config::HitlConfig;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::risk::RiskAssessment;
use crate::types::{now, RiskLevel, RoutingDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// §3 ApprovalRequest status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Escalated,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Escalated | Self::Cancelled
        )
    }
}

/// §3 ApprovalRequest, owned exclusively by `HITLController`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub decision: RoutingDecision,
    pub risk_level: RiskLevel,
    /// The full `RiskAssessor::assess` output this approval was created
    /// from, not just its bucketed `risk_level` (§4.8): `factors[]` and
    /// `reasoning` are the audit trail spec.md pins for this call point,
    /// so they ride along on the checkpointed request itself and reach
    /// the `Notifier` call alongside everything else about the request.
    pub risk_assessment: RiskAssessment,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub approver_id: Option<String>,
    pub decision_comment: Option<String>,
    pub escalation_level: u32,
    /// Not in §3's published shape, but required to notify and to clean
    /// up the pending index on a terminal transition without re-scanning
    /// every approver's index.
    pub approvers: Vec<String>,
}

/// Outcome of one `Notifier::notify` call (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub delivered: bool,
    pub detail: String,
}

/// Pure interface — Teams/email implementations are out of scope (§1,
/// §4.8, §9). The crate compiles and its test suite passes with no real
/// transport behind this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &ApprovalRequest, channel: &str) -> Result<DeliveryResult>;
}

fn approval_key(id: &str) -> String {
    format!("approvals/{id}")
}

fn pending_index_key(approver: &str, id: &str) -> String {
    format!("approvals/pending/{approver}/{id}")
}

/// State machine over `ApprovalRequest` (§4.8): creation, approve/reject/
/// cancel, and a background sweep that expires and escalates.
pub struct HITLController {
    store: Arc<dyn CheckpointStore>,
    metrics: Metrics,
    config: HitlConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl HITLController {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        metrics: Metrics,
        config: HitlConfig,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            store,
            metrics,
            config,
            notifier,
        }
    }

    /// Retry policy (§4.8): 3 attempts with exponential backoff 1s / 5s /
    /// 25s between them, spawned off the caller's task so a notifier
    /// outage never delays or fails the state transition that triggered
    /// it (§7 "notifier failure is non-fatal").
    fn notify_async(&self, request: ApprovalRequest, channel: String) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        tokio::spawn(async move {
            let backoffs = [Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(25)];
            let mut attempt = 0usize;
            loop {
                match notifier.notify(&request, &channel).await {
                    Ok(result) if result.delivered => return,
                    Ok(result) => {
                        tracing::warn!(
                            approval_id = %request.approval_id,
                            detail = %result.detail,
                            "notifier reported non-delivery"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(approval_id = %request.approval_id, error = %err, "notifier call failed");
                    }
                }
                if attempt >= backoffs.len() {
                    tracing::warn!(approval_id = %request.approval_id, "notifier exhausted all retries");
                    return;
                }
                tokio::time::sleep(backoffs[attempt]).await;
                attempt += 1;
            }
        });
    }

    async fn load(&self, approval_id: &str) -> Result<(ApprovalRequest, crate::checkpoint::Version)> {
        let (payload, version) = self
            .store
            .load(&approval_key(approval_id))
            .await?
            .ok_or_else(|| Error::ApprovalNotFound(approval_id.to_string()))?;
        Ok((serde_json::from_slice(&payload)?, version))
    }

    async fn refresh_pending_gauge(&self) -> Result<()> {
        let keys = self.store.list("approvals/").await?;
        let mut pending = 0i64;
        for key in keys {
            if key.starts_with("approvals/pending/") {
                continue;
            }
            if let Some((payload, _)) = self.store.load(&key).await? {
                if let Ok(request) = serde_json::from_slice::<ApprovalRequest>(&payload) {
                    if request.status == ApprovalStatus::Pending {
                        pending += 1;
                    }
                }
            }
        }
        self.metrics.set_hitl_pending(pending);
        Ok(())
    }

    async fn remove_pending_index(&self, request: &ApprovalRequest) -> Result<()> {
        for approver in &request.approvers {
            self.store
                .delete(&pending_index_key(approver, &request.approval_id))
                .await?;
        }
        Ok(())
    }

    /// Creates a `Pending` approval with the configured TTL and notifies
    /// every approver (§4.8 `request_approval(decision, risk_assessment,
    /// approvers)`). `risk_assessment` is the full `RiskAssessor::assess`
    /// output, not just its bucketed level — its `factors`/`reasoning`
    /// audit trail is stored on the `ApprovalRequest` itself.
    pub async fn request_approval(
        &self,
        decision: RoutingDecision,
        risk_assessment: RiskAssessment,
        approvers: Vec<String>,
    ) -> Result<String> {
        let approval_id = uuid::Uuid::new_v4().to_string();
        let requested_at = now();
        let risk_level = risk_assessment.risk_level;
        let request = ApprovalRequest {
            approval_id: approval_id.clone(),
            decision,
            risk_level,
            risk_assessment: risk_assessment.clone(),
            requested_at,
            expires_at: requested_at + chrono::Duration::from_std(self.config.approval_ttl).unwrap(),
            status: ApprovalStatus::Pending,
            approver_id: None,
            decision_comment: None,
            escalation_level: 0,
            approvers: approvers.clone(),
        };

        let payload = serde_json::to_vec(&request)?;
        self.store.cas(&approval_key(&approval_id), payload, 0).await?;
        for approver in &approvers {
            self.store
                .save(&pending_index_key(approver, &approval_id), Vec::new(), None)
                .await?;
        }

        self.metrics.inc_hitl_requests(risk_level_label(risk_level), "pending");
        self.refresh_pending_gauge().await?;
        for approver in &approvers {
            self.notify_async(request.clone(), approver.clone());
        }
        tracing::info!(
            approval_id,
            ?risk_level,
            factors = risk_assessment.factors.len(),
            reasoning = %risk_assessment.reasoning,
            "approval request created"
        );
        Ok(approval_id)
    }

    /// Applies `transform` to the loaded request under CAS, retrying once
    /// on a conflict and returning `ApprovalTerminal` if the reloaded
    /// request is already terminal (§7 "CAS conflict on approval").
    async fn transition(
        &self,
        approval_id: &str,
        mut transform: impl FnMut(&mut ApprovalRequest) -> Result<()>,
    ) -> Result<ApprovalRequest> {
        let mut attempts_left = 2;
        loop {
            let (mut request, version) = self.load(approval_id).await?;
            if request.status.is_terminal() {
                return Err(Error::ApprovalTerminal(approval_id.to_string()));
            }
            transform(&mut request)?;
            let payload = serde_json::to_vec(&request)?;
            match self.store.cas(&approval_key(approval_id), payload, version).await? {
                CasOutcome::Updated(_) => return Ok(request),
                CasOutcome::Conflict => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        let (reloaded, _) = self.load(approval_id).await?;
                        return if reloaded.status.is_terminal() {
                            Err(Error::ApprovalTerminal(approval_id.to_string()))
                        } else {
                            Err(Error::Conflict(approval_id.to_string()))
                        };
                    }
                    continue;
                }
            }
        }
    }

    pub async fn approve(&self, approval_id: &str, approver: &str, comment: Option<String>) -> Result<()> {
        let approver = approver.to_string();
        let comment_clone = comment.clone();
        let request = self
            .transition(approval_id, move |request| {
                request.status = ApprovalStatus::Approved;
                request.approver_id = Some(approver.clone());
                request.decision_comment = comment_clone.clone();
                Ok(())
            })
            .await?;

        self.remove_pending_index(&request).await?;
        self.metrics
            .inc_hitl_requests(risk_level_label(request.risk_level), "approved");
        self.refresh_pending_gauge().await?;
        let channel = request.approver_id.clone().unwrap_or_default();
        self.notify_async(request.clone(), channel);
        let elapsed = (now() - request.requested_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics.observe_hitl_approval_time(elapsed);
        Ok(())
    }

    pub async fn reject(&self, approval_id: &str, approver: &str, comment: String) -> Result<()> {
        let approver = approver.to_string();
        let request = self
            .transition(approval_id, move |request| {
                request.status = ApprovalStatus::Rejected;
                request.approver_id = Some(approver.clone());
                request.decision_comment = Some(comment.clone());
                Ok(())
            })
            .await?;

        self.remove_pending_index(&request).await?;
        self.metrics
            .inc_hitl_requests(risk_level_label(request.risk_level), "rejected");
        self.refresh_pending_gauge().await?;
        let channel = request.approver_id.clone().unwrap_or_default();
        self.notify_async(request, channel);
        Ok(())
    }

    pub async fn cancel(&self, approval_id: &str) -> Result<()> {
        let request = self
            .transition(approval_id, |request| {
                request.status = ApprovalStatus::Cancelled;
                Ok(())
            })
            .await?;

        self.remove_pending_index(&request).await?;
        self.metrics
            .inc_hitl_requests(risk_level_label(request.risk_level), "cancelled");
        self.refresh_pending_gauge().await?;
        Ok(())
    }

    pub async fn list_pending(&self, approver: &str) -> Result<Vec<ApprovalRequest>> {
        let prefix = format!("approvals/pending/{approver}/");
        let index_keys = self.store.list(&prefix).await?;
        let mut results = Vec::with_capacity(index_keys.len());
        for index_key in index_keys {
            let Some(approval_id) = index_key.strip_prefix(&prefix) else {
                continue;
            };
            if let Ok((request, _)) = self.load(approval_id).await {
                if request.status == ApprovalStatus::Pending {
                    results.push(request);
                }
            }
        }
        Ok(results)
    }

    /// Background sweep (§5): expires `Pending` requests whose TTL has
    /// elapsed, then escalates (deriving a successor at `escalation_level
    /// + 1`) or terminates as `Rejected` if the cap is reached (§4.8).
    /// Idempotent — observing an already-terminal request is a no-op.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let keys = self.store.list("approvals/").await?;
        let mut swept = 0usize;
        for key in keys {
            if key.starts_with("approvals/pending/") {
                continue;
            }
            let Some(approval_id) = key.strip_prefix("approvals/") else {
                continue;
            };
            let Ok((request, version)) = self.load(approval_id).await else {
                continue;
            };
            if request.status != ApprovalStatus::Pending || now() < request.expires_at {
                continue;
            }

            let mut expired = request.clone();
            expired.status = ApprovalStatus::Expired;
            let payload = serde_json::to_vec(&expired)?;
            let expired_version = match self.store.cas(&key, payload, version).await? {
                CasOutcome::Updated(v) => v,
                CasOutcome::Conflict => continue, // another sweeper tick already handled this key
            };

            if request.escalation_level < self.config.escalation_cap {
                let derived_id = uuid::Uuid::new_v4().to_string();
                let requested_at = now();
                let derived = ApprovalRequest {
                    approval_id: derived_id.clone(),
                    decision: request.decision.clone(),
                    risk_level: request.risk_level,
                    risk_assessment: request.risk_assessment.clone(),
                    requested_at,
                    expires_at: requested_at
                        + chrono::Duration::from_std(self.config.approval_ttl).unwrap(),
                    status: ApprovalStatus::Pending,
                    approver_id: None,
                    decision_comment: None,
                    escalation_level: request.escalation_level + 1,
                    approvers: request.approvers.clone(),
                };
                self.store
                    .cas(&approval_key(&derived_id), serde_json::to_vec(&derived)?, 0)
                    .await?;
                for approver in &derived.approvers {
                    self.store
                        .save(&pending_index_key(approver, &derived_id), Vec::new(), None)
                        .await?;
                }
                self.remove_pending_index(&request).await?;

                // `expired → escalated` (§4.8): the original request's
                // terminal state is `Escalated`, not the transient `Expired`
                // it held between the two CAS writes.
                let mut escalated = expired.clone();
                escalated.status = ApprovalStatus::Escalated;
                let _ = self
                    .store
                    .cas(&key, serde_json::to_vec(&escalated)?, expired_version)
                    .await?;

                self.notify_async(escalated, "escalation".to_string());
                for approver in &derived.approvers {
                    self.notify_async(derived.clone(), approver.clone());
                }
                tracing::info!(approval_id, derived_id, "approval escalated after expiry");
            } else {
                let mut rejected = expired.clone();
                rejected.status = ApprovalStatus::Rejected;
                let _ = self
                    .store
                    .cas(&key, serde_json::to_vec(&rejected)?, expired_version)
                    .await?;
                self.remove_pending_index(&request).await?;
                self.notify_async(rejected, "escalation-cap-reached".to_string());
                tracing::info!(approval_id, "approval chain terminated: escalation cap reached");
            }

            swept += 1;
        }
        self.refresh_pending_gauge().await?;
        Ok(swept)
    }
}

fn risk_level_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::risk::RiskAssessor;
    use crate::types::{CompletenessInfo, IntentCategory, Layer, RequestContext, WorkflowType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_decision() -> RoutingDecision {
        RoutingDecision {
            intent_category: IntentCategory::Incident,
            sub_intent: "etl_failure".into(),
            confidence: 0.95,
            risk_level: RiskLevel::High,
            workflow_type: WorkflowType::Sequential,
            layer_used: Layer::Pattern,
            completeness: CompletenessInfo {
                score: 1.0,
                threshold: 0.6,
                missing_fields: vec![],
            },
            extracted_fields: HashMap::new(),
            latency_ms: 3,
            raw_input: "ETL pipeline failed".into(),
            metadata: HashMap::new(),
        }
    }

    /// Runs the real `RiskAssessor` rather than hand-building a
    /// `RiskAssessment`, so these tests exercise the same
    /// `assess → request_approval` wiring a caller goes through (§4.8's
    /// data-flow: `RiskAssessor → (HIGH+?) → HITLController`).
    fn sample_risk_assessment() -> RiskAssessment {
        RiskAssessor::new().assess(IntentCategory::Incident, "etl_failure", &RequestContext::default())
    }

    fn controller(config: HitlConfig) -> HITLController {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        HITLController::new(store, Metrics::new(), config, None)
    }

    #[tokio::test]
    async fn approve_transitions_pending_to_approved() {
        let hitl = controller(HitlConfig::default());
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        hitl.approve(&id, "alice", Some("looks fine".into())).await.unwrap();

        let (request, _) = hitl.load(&id).await.unwrap();
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(request.approver_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn double_approve_returns_approval_terminal() {
        let hitl = controller(HitlConfig::default());
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        hitl.approve(&id, "alice", None).await.unwrap();
        let err = hitl.approve(&id, "alice", None).await.unwrap_err();
        assert!(matches!(err, Error::ApprovalTerminal(_)));
    }

    #[tokio::test]
    async fn cancel_removes_entry_from_pending_list() {
        let hitl = controller(HitlConfig::default());
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        assert_eq!(hitl.list_pending("alice").await.unwrap().len(), 1);
        hitl.cancel(&id).await.unwrap();
        assert_eq!(hitl.list_pending("alice").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn sweep_escalates_expired_pending_request_below_cap() {
        let config = HitlConfig::default()
            .with_approval_ttl(Duration::from_millis(1))
            .with_escalation_cap(2);
        let hitl = controller(config);
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let swept = hitl.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);

        let (original, _) = hitl.load(&id).await.unwrap();
        assert_eq!(original.status, ApprovalStatus::Escalated);
        assert!(original.status.is_terminal());

        let pending = hitl.list_pending("alice").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].escalation_level, 1);
    }

    #[tokio::test]
    async fn sweep_terminates_chain_as_rejected_once_cap_reached() {
        let config = HitlConfig::default()
            .with_approval_ttl(Duration::from_millis(1))
            .with_escalation_cap(0);
        let hitl = controller(config);
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        hitl.sweep_expired().await.unwrap();

        let (request, _) = hitl.load(&id).await.unwrap();
        assert_eq!(request.status, ApprovalStatus::Rejected);
        assert!(hitl.list_pending("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_idempotent_on_already_terminal_requests() {
        let hitl = controller(HitlConfig::default());
        let id = hitl
            .request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        hitl.approve(&id, "alice", None).await.unwrap();
        let swept = hitl.sweep_expired().await.unwrap();
        assert_eq!(swept, 0);
    }

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _request: &ApprovalRequest, _channel: &str) -> Result<DeliveryResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryResult {
                delivered: true,
                detail: "ok".into(),
            })
        }
    }

    #[tokio::test]
    async fn notifier_is_called_on_create_without_blocking_the_caller() {
        let count = Arc::new(AtomicUsize::new(0));
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let hitl = HITLController::new(
            store,
            Metrics::new(),
            HitlConfig::default(),
            Some(Arc::new(CountingNotifier(count.clone()))),
        );
        hitl.request_approval(sample_decision(), sample_risk_assessment(), vec!["alice".into()])
            .await
            .unwrap();
        // give the spawned notify task a chance to run
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
