//! C6 GuidedDialogEngine (§4.6): owns `DialogSession` state, asks for
//! missing fields, and refines `sub_intent` on each answer without ever
//! reclassifying. The "statefully interesting part" of the core.

pub mod questions;
pub mod refinement;
pub mod session;

pub use questions::{Question, QuestionGenerator};
pub use refinement::RefinementTable;
pub use session::{DialogSession, DialogTurn, SessionStatus, TurnRole};

use crate::checkpoint::CheckpointStore;
use crate::config::{DialogConfig, RuleSnapshot};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::router::IntentRouter;
use crate::types::{now, RequestContext, RoutingDecision};
use std::sync::Arc;

pub type SessionId = String;

fn session_key(session_id: &str) -> String {
    format!("dialog/{session_id}")
}

/// Result of `start`/`respond`: the current decision, any follow-up
/// questions, and whether the dialog has reached sufficiency (§6.2).
#[derive(Debug, Clone)]
pub struct DialogResponse {
    pub decision: RoutingDecision,
    pub questions: Vec<Question>,
    pub completed: bool,
}

/// Owns dialog sessions end-to-end: creation, incremental field
/// extraction, rule-based refinement, and completion (§4.6).
pub struct GuidedDialogEngine {
    router: Arc<IntentRouter>,
    refinement: RefinementTable,
    questions: QuestionGenerator,
    store: Arc<dyn CheckpointStore>,
    metrics: Metrics,
    config: DialogConfig,
}

impl GuidedDialogEngine {
    pub fn new(
        router: Arc<IntentRouter>,
        refinement: RefinementTable,
        questions: QuestionGenerator,
        store: Arc<dyn CheckpointStore>,
        metrics: Metrics,
        config: DialogConfig,
    ) -> Self {
        Self {
            router,
            refinement,
            questions,
            store,
            metrics,
            config,
        }
    }

    /// Builds the wired engine from a loaded `RuleSnapshot`: compiles
    /// `refinement_rules` into `RefinementTable` and `question_templates`
    /// into `QuestionGenerator`, reusing the `IntentRouter` an earlier
    /// `IntentRouter::from_snapshot` call built from the same snapshot
    /// (§4.6, §6.1).
    pub fn from_snapshot(
        router: Arc<IntentRouter>,
        snapshot: &RuleSnapshot,
        store: Arc<dyn CheckpointStore>,
        metrics: Metrics,
        config: DialogConfig,
    ) -> Self {
        let refinement = RefinementTable::load(snapshot.refinement_rules.clone());
        let questions = QuestionGenerator::load(snapshot.question_templates.clone());
        Self::new(router, refinement, questions, store, metrics, config)
    }

    /// Runs `IntentRouter::route`; if already sufficient, no session is
    /// created (§4.6 `start`).
    pub async fn start(&self, text: &str, context: &RequestContext) -> Result<(Option<SessionId>, DialogResponse)> {
        let decision = self.router.route(text, context).await;
        if decision.is_sufficient() {
            return Ok((
                None,
                DialogResponse {
                    decision,
                    questions: Vec::new(),
                    completed: true,
                },
            ));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = DialogSession::new(session_id.clone(), decision.clone());
        let payload = serde_json::to_vec(&session)?;
        self.store.cas(&session_key(&session_id), payload, 0).await?;
        self.metrics.inc_dialog_active();

        let questions = self.questions.questions_for(&decision.completeness.missing_fields);
        tracing::info!(session_id, "dialog session started");
        Ok((
            Some(session_id),
            DialogResponse {
                decision,
                questions,
                completed: false,
            },
        ))
    }

    async fn load_session(&self, session_id: &str) -> Result<(DialogSession, crate::checkpoint::Version)> {
        let (payload, version) = self
            .store
            .load(&session_key(session_id))
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let session: DialogSession = serde_json::from_slice(&payload)?;
        if session.is_idle_expired(chrono::Duration::from_std(self.config.idle_timeout).unwrap()) {
            return Err(Error::SessionExpired(session_id.to_string()));
        }
        Ok((session, version))
    }

    /// The incremental-update algorithm (§4.6): extract from the new
    /// turn's text, refine sub_intent via rules only, recompute
    /// completeness, and either complete the session or ask the next
    /// round of questions.
    pub async fn respond(&self, session_id: &str, text: &str) -> Result<DialogResponse> {
        let mut attempts_left = self.config.cas_retry_attempts + 1;
        loop {
            let (mut session, version) = self.load_session(session_id).await?;
            if session.status != SessionStatus::Active {
                return Err(Error::Conflict(format!(
                    "session {session_id} is not active"
                )));
            }

            let category = session.current_decision.intent_category;
            let current_sub_intent = session.current_decision.sub_intent.clone();
            let completeness_checker = self.router.completeness();

            let extracted_this_turn =
                completeness_checker.extract_fields_from_text(category, &current_sub_intent, text);
            for (key, value) in &extracted_this_turn {
                session.accumulated_fields.insert(key.clone(), value.clone());
            }

            let refined_sub_intent = self
                .refinement
                .refine(&current_sub_intent, &session.accumulated_fields)
                .unwrap_or(current_sub_intent);

            let completeness =
                completeness_checker.check(category, &refined_sub_intent, &mut session.accumulated_fields, text);
            let is_sufficient = completeness.is_sufficient();

            let mut new_decision = session.current_decision.clone();
            new_decision.sub_intent = refined_sub_intent;
            new_decision.completeness = completeness.clone();
            new_decision.extracted_fields = session.accumulated_fields.clone();

            session.current_decision = new_decision.clone();
            session.push_turn(DialogTurn {
                role: TurnRole::User,
                content: text.to_string(),
                timestamp: now(),
                fields_extracted_this_turn: extracted_this_turn,
                decision_snapshot: new_decision.clone(),
            });

            debug_assert!(
                session.category_invariant_holds(),
                "refinement must never change intent_category"
            );

            if is_sufficient {
                session.status = SessionStatus::Completed;
            }

            let payload = serde_json::to_vec(&session)?;
            match self.store.cas(&session_key(session_id), payload, version).await? {
                crate::checkpoint::CasOutcome::Updated(_) => {
                    if is_sufficient {
                        self.metrics.dec_dialog_active();
                        let duration = (now() - session.created_at).num_milliseconds().max(0) as f64 / 1000.0;
                        self.metrics.observe_dialog_duration(duration);
                        tracing::info!(session_id, "dialog session completed");
                    }
                    let questions = if is_sufficient {
                        Vec::new()
                    } else {
                        self.questions.questions_for(&completeness.missing_fields)
                    };
                    return Ok(DialogResponse {
                        decision: new_decision,
                        questions,
                        completed: is_sufficient,
                    });
                }
                crate::checkpoint::CasOutcome::Conflict => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(Error::Conflict(session_id.to_string()));
                    }
                    tracing::debug!(session_id, "dialog cas conflict, reloading and retrying");
                    continue;
                }
            }
        }
    }

    /// Marks a session terminal. A session closed before it reaches
    /// sufficiency is a cancellation; closing an already-`Completed`
    /// session is a no-op (§4.6 `close`).
    pub async fn close(&self, session_id: &str) -> Result<()> {
        let (mut session, version) = self.load_session(session_id).await?;
        if session.status == SessionStatus::Completed {
            return Ok(());
        }
        let was_active = session.status == SessionStatus::Active || session.status == SessionStatus::Paused;
        session.status = SessionStatus::Completed;
        if was_active {
            self.metrics.dec_dialog_active();
        }
        let payload = serde_json::to_vec(&session)?;
        match self.store.cas(&session_key(session_id), payload, version).await? {
            crate::checkpoint::CasOutcome::Updated(_) => Ok(()),
            crate::checkpoint::CasOutcome::Conflict => Err(Error::Conflict(session_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::completeness::CompletenessChecker;
    use crate::error::Error as CrateError;
    use crate::rules::{
        CompletenessRuleDef, ConditionDef, ExtractorDef, FieldDef, QuestionTemplateDef,
        RefinementBranchDef, RefinementRuleDef,
    };
    use crate::tiers::llm::{LLMClient, LlmRawResponse};
    use crate::tiers::semantic::Embedder;
    use crate::tiers::{LLMClassifier, PatternMatcher, SemanticRouter};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NeverEmbed;
    #[async_trait]
    impl Embedder for NeverEmbed {
        async fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    struct GeneralRequestLlm;
    #[async_trait]
    impl LLMClient for GeneralRequestLlm {
        async fn complete_structured(&self, _prompt: &str) -> crate::error::Result<LlmRawResponse> {
            Ok(LlmRawResponse {
                category: "request".into(),
                sub_intent: "general_request".into(),
                confidence: 0.6,
                missing_fields_hint: vec![],
            })
        }
    }

    async fn engine() -> GuidedDialogEngine {
        let pattern = PatternMatcher::load(vec![], 0.90).unwrap();
        let semantic = SemanticRouter::load(vec![], Arc::new(NeverEmbed), 0.85).await.unwrap();
        let llm = LLMClassifier::new(
            Arc::new(GeneralRequestLlm),
            Duration::from_secs(2),
            vec![(crate::types::IntentCategory::Request, "general_request".into())],
        );
        let completeness = Arc::new(
            CompletenessChecker::load(vec![CompletenessRuleDef {
                category: "request".into(),
                sub_intent: Some("general_request".into()),
                required_fields: vec![
                    FieldDef {
                        key: "requester".into(),
                        extractors: vec![ExtractorDef::Regex {
                            pattern: r"申請人是\s*(\w+)".into(),
                        }],
                    },
                    FieldDef {
                        key: "justification".into(),
                        extractors: vec![ExtractorDef::Keywords {
                            values: vec!["gitlab".into(), "專案".into()],
                        }],
                    },
                ],
                optional_fields: vec![],
                threshold: 0.60,
            }])
            .unwrap(),
        );
        let router = Arc::new(IntentRouter::new(pattern, semantic, llm, completeness, Metrics::new()));
        let refinement = RefinementTable::load(vec![RefinementRuleDef {
            from_sub_intent: "general_request".into(),
            branches: vec![RefinementBranchDef {
                conditions: vec![ConditionDef::Contains {
                    field: "justification".into(),
                    value: "gitlab".into(),
                }],
                target_sub_intent: "account_request".into(),
            }],
        }]);
        let questions = QuestionGenerator::load(vec![]);
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        GuidedDialogEngine::new(router, refinement, questions, store, Metrics::new(), DialogConfig::default())
    }

    #[tokio::test]
    async fn start_creates_session_when_insufficient() {
        let engine = engine().await;
        let (session_id, response) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        assert!(session_id.is_some());
        assert!(!response.completed);
        assert!(!response.questions.is_empty());
    }

    #[tokio::test]
    async fn respond_refines_sub_intent_without_reclassifying() {
        let engine = engine().await;
        let (session_id, _) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        let session_id = session_id.unwrap();

        let response = engine
            .respond(&session_id, "申請人是Alice，因為新專案需要GitLab")
            .await
            .unwrap();

        assert_eq!(response.decision.sub_intent, "account_request");
        assert_eq!(
            response.decision.intent_category,
            crate::types::IntentCategory::Request
        );
        assert!(response.completed);
    }

    #[tokio::test]
    async fn category_invariant_holds_across_turns() {
        let engine = engine().await;
        let (session_id, _) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        let session_id = session_id.unwrap();
        engine.respond(&session_id, "申請人是Alice").await.unwrap();

        let (session, _) = engine.load_session(&session_id).await.unwrap();
        assert!(session.category_invariant_holds());
    }

    #[tokio::test]
    async fn accumulated_fields_are_monotone_across_turns() {
        let engine = engine().await;
        let (session_id, _) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        let session_id = session_id.unwrap();

        engine.respond(&session_id, "申請人是Alice").await.unwrap();
        let (after_first, _) = engine.load_session(&session_id).await.unwrap();
        let keys_after_first: std::collections::HashSet<_> =
            after_first.accumulated_fields.keys().cloned().collect();

        engine.respond(&session_id, "因為新專案需要GitLab").await.unwrap();
        let (after_second, _) = engine.load_session(&session_id).await.unwrap();
        let keys_after_second: std::collections::HashSet<_> =
            after_second.accumulated_fields.keys().cloned().collect();

        assert!(keys_after_first.is_subset(&keys_after_second));
    }

    #[tokio::test]
    async fn from_snapshot_wires_refinement_and_question_templates() {
        let pattern = PatternMatcher::load(vec![], 0.90).unwrap();
        let semantic = SemanticRouter::load(vec![], Arc::new(NeverEmbed), 0.85).await.unwrap();
        let llm = LLMClassifier::new(
            Arc::new(GeneralRequestLlm),
            Duration::from_secs(2),
            vec![(crate::types::IntentCategory::Request, "general_request".into())],
        );
        let completeness = Arc::new(
            CompletenessChecker::load(vec![CompletenessRuleDef {
                category: "request".into(),
                sub_intent: Some("general_request".into()),
                required_fields: vec![FieldDef {
                    key: "requester".into(),
                    extractors: vec![ExtractorDef::Regex {
                        pattern: r"申請人是\s*(\w+)".into(),
                    }],
                }],
                optional_fields: vec![],
                threshold: 0.99,
            }])
            .unwrap(),
        );
        let router = Arc::new(IntentRouter::new(pattern, semantic, llm, completeness, Metrics::new()));

        let snapshot = crate::config::RuleSnapshot {
            refinement_rules: vec![RefinementRuleDef {
                from_sub_intent: "general_request".into(),
                branches: vec![RefinementBranchDef {
                    conditions: vec![ConditionDef::Contains {
                        field: "requester".into(),
                        value: "alice".into(),
                    }],
                    target_sub_intent: "account_request".into(),
                }],
            }],
            question_templates: vec![QuestionTemplateDef {
                field_key: "requester".into(),
                template: "Who is requesting this?".into(),
            }],
            ..crate::config::RuleSnapshot::default()
        };

        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let engine = GuidedDialogEngine::from_snapshot(
            router,
            &snapshot,
            store,
            Metrics::new(),
            DialogConfig::default(),
        );

        let (session_id, response) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        assert!(session_id.is_some());
        assert_eq!(response.questions[0].text, "Who is requesting this?");

        let session_id = session_id.unwrap();
        let respond = engine
            .respond(&session_id, "申請人是alice")
            .await
            .unwrap();
        assert_eq!(respond.decision.sub_intent, "account_request");
    }

    #[tokio::test]
    async fn respond_on_unknown_session_returns_session_not_found() {
        let engine = engine().await;
        let err = engine.respond("does-not-exist", "hi").await.unwrap_err();
        assert!(matches!(err, CrateError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn close_marks_session_completed_and_is_idempotent() {
        let engine = engine().await;
        let (session_id, _) = engine.start("我要申請帳號", &RequestContext::default()).await.unwrap();
        let session_id = session_id.unwrap();

        engine.close(&session_id).await.unwrap();
        let (session, _) = engine.load_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        engine.close(&session_id).await.unwrap();
    }
}
