//! C3 LLMClassifier: the remote classifier of last resort (§4.3). The LLM
//! provider itself is an external collaborator (§1); this module only
//! needs its contract, shaped after the teacher's `llm/client.rs`
//! `LLMClient` trait and `ClientConfig` builder.

use crate::types::{IntentCategory, Layer, RequestContext};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{TierClassifier, TierOutcome};

/// Structured output the LLM provider returns for one classification call.
#[derive(Debug, Clone)]
pub struct LlmRawResponse {
    pub category: String,
    pub sub_intent: String,
    pub confidence: f64,
    pub missing_fields_hint: Vec<String>,
}

/// Contract for the external LLM collaborator (§1, §4.3).
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete_structured(&self, prompt: &str) -> crate::error::Result<LlmRawResponse>;
}

/// Remote classifier of last resort. Always emits a result — never falls
/// through further, since there is no lower tier (§4.5 step 3).
pub struct LLMClassifier {
    client: Arc<dyn LLMClient>,
    timeout: Duration,
    allowed_pairs: Vec<(IntentCategory, String)>,
}

impl LLMClassifier {
    pub fn new(
        client: Arc<dyn LLMClient>,
        timeout: Duration,
        allowed_pairs: Vec<(IntentCategory, String)>,
    ) -> Self {
        Self {
            client,
            timeout,
            allowed_pairs,
        }
    }

    fn build_prompt(&self, text: &str, context: &RequestContext) -> String {
        let vocabulary: Vec<String> = self
            .allowed_pairs
            .iter()
            .map(|(category, sub_intent)| format!("{category}/{sub_intent}"))
            .collect();
        format!(
            "Classify the following IT service request into exactly one of: {}.\n\
             Environment: {:?}\n\
             Request: {text}",
            vocabulary.join(", "),
            context.environment,
        )
    }

    fn validate(&self, raw: LlmRawResponse) -> Option<TierOutcome> {
        let category = IntentCategory::from_str(&raw.category).ok()?;
        self.allowed_pairs
            .iter()
            .any(|(c, s)| *c == category && *s == raw.sub_intent)
            .then(|| TierOutcome {
                category,
                sub_intent: raw.sub_intent,
                confidence: raw.confidence,
                layer: Layer::Llm,
                missing_fields_hint: raw.missing_fields_hint,
            })
    }

    fn unknown_outcome() -> TierOutcome {
        TierOutcome {
            category: IntentCategory::Unknown,
            sub_intent: "general".into(),
            confidence: 0.0,
            layer: Layer::Llm,
            missing_fields_hint: vec![],
        }
    }

    /// At most one retry on transient failure; malformed/off-vocabulary
    /// output is coerced to `Unknown`/confidence 0 rather than retried —
    /// a retry would not fix a schema mismatch (§4.3, §7).
    async fn classify_with_retry(&self, prompt: &str) -> TierOutcome {
        for attempt in 0..2 {
            match self.client.complete_structured(prompt).await {
                Ok(raw) => return self.validate(raw).unwrap_or_else(Self::unknown_outcome),
                Err(err) if attempt == 0 => {
                    tracing::warn!(error = %err, "llm call failed, retrying once");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "llm call failed after retry, emitting unknown");
                }
            }
        }
        Self::unknown_outcome()
    }

    /// One remote call (plus at most one retry) bounded by a 2s total
    /// budget (§4.3).
    pub async fn classify(&self, text: &str, context: &RequestContext) -> TierOutcome {
        let prompt = self.build_prompt(text, context);
        match tokio::time::timeout(self.timeout, self.classify_with_retry(&prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("llm classification exceeded budget, emitting unknown");
                Self::unknown_outcome()
            }
        }
    }
}

#[async_trait]
impl TierClassifier for LLMClassifier {
    fn layer(&self) -> Layer {
        Layer::Llm
    }

    /// Always 0.0: the terminal tier must emit even at confidence 0
    /// (§4.5 step 3), so the coordinator's uniform `confidence >=
    /// threshold()` check always accepts it.
    fn threshold(&self) -> f64 {
        0.0
    }

    async fn try_classify(&self, text: &str, context: &RequestContext) -> Option<TierOutcome> {
        Some(self.classify(text, context).await)
    }
}
