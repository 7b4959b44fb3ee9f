//! C2 SemanticRouter: the vector-similarity tier (§4.2). The embedding
//! model itself is an external collaborator (§1 out-of-scope); this module
//! only needs its contract, captured in the `Embedder` trait — the same
//! shape as the teacher's `LLMClient::embed` method in `llm/client.rs`.

use crate::error::Result;
use crate::rules::SemanticRouteDef;
use crate::types::{IntentCategory, Layer, RequestContext};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

use super::{TierClassifier, TierOutcome};

/// Contract for the external embedding collaborator (§1).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

struct CompiledRoute {
    category: IntentCategory,
    sub_intent: String,
    utterance_vectors: Vec<Vec<f32>>,
}

/// Result of a single `route` call (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticResult {
    pub category: IntentCategory,
    pub sub_intent: String,
    pub similarity: f64,
}

/// Vector-similarity classification tier over labeled example utterances.
pub struct SemanticRouter {
    routes: Vec<CompiledRoute>,
    embedder: Arc<dyn Embedder>,
    threshold: f64,
}

impl SemanticRouter {
    /// Embeds every route's utterances once, up front (§4.2).
    pub async fn load(
        defs: Vec<SemanticRouteDef>,
        embedder: Arc<dyn Embedder>,
        threshold: f64,
    ) -> Result<Self> {
        let mut routes = Vec::with_capacity(defs.len());
        for def in defs {
            let category = IntentCategory::from_str(&def.category)?;
            let mut utterance_vectors = Vec::with_capacity(def.utterances.len());
            for utterance in &def.utterances {
                utterance_vectors.push(embedder.embed(utterance).await?);
            }
            routes.push(CompiledRoute {
                category,
                sub_intent: def.sub_intent,
                utterance_vectors,
            });
        }
        Ok(Self {
            routes,
            embedder,
            threshold,
        })
    }

    /// Embeds `text` and returns the route with the highest max-similarity
    /// utterance, if it clears `threshold`. Embedding failures are
    /// swallowed into `None` — never propagated to the caller (§4.2, §7).
    pub async fn route(&self, text: &str) -> Option<SemanticResult> {
        let embedding = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "semantic embedding call failed, falling through");
                return None;
            }
        };

        let mut best: Option<(&CompiledRoute, f64)> = None;
        for route in &self.routes {
            let similarity = route
                .utterance_vectors
                .iter()
                .map(|v| cosine_similarity(&embedding, v))
                .fold(f64::MIN, f64::max);
            let better = match best {
                None => true,
                Some((_, best_similarity)) => similarity > best_similarity,
            };
            if better {
                best = Some((route, similarity));
            }
        }

        best.filter(|(_, similarity)| *similarity >= self.threshold)
            .map(|(route, similarity)| SemanticResult {
                category: route.category,
                sub_intent: route.sub_intent.clone(),
                similarity,
            })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[async_trait]
impl TierClassifier for SemanticRouter {
    fn layer(&self) -> Layer {
        Layer::Semantic
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn try_classify(&self, text: &str, _context: &RequestContext) -> Option<TierOutcome> {
        self.route(text).await.map(|r| TierOutcome {
            category: r.category,
            sub_intent: r.sub_intent,
            confidence: r.similarity,
            layer: Layer::Semantic,
            missing_fields_hint: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // deterministic toy embedding: presence of a few keywords as one-hot dims
            Ok(vec![
                text.contains("password") as i32 as f32,
                text.contains("reset") as i32 as f32,
                text.contains("status") as i32 as f32,
            ])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::UpstreamUnavailable("embedding service down".into()))
        }
    }

    fn route_def() -> SemanticRouteDef {
        SemanticRouteDef {
            id: "password_reset".into(),
            category: "request".into(),
            sub_intent: "password_reset".into(),
            utterances: vec![
                "please reset my password".into(),
                "password reset needed".into(),
                "reset password".into(),
                "reset my password".into(),
                "password needs reset".into(),
            ],
        }
    }

    #[tokio::test]
    async fn exact_keyword_overlap_clears_threshold() {
        let router = SemanticRouter::load(vec![route_def()], Arc::new(StubEmbedder), 0.85)
            .await
            .unwrap();
        let result = router.route("reset password please").await.unwrap();
        assert_eq!(result.sub_intent, "password_reset");
    }

    #[tokio::test]
    async fn unrelated_text_falls_below_threshold() {
        let router = SemanticRouter::load(vec![route_def()], Arc::new(StubEmbedder), 0.85)
            .await
            .unwrap();
        assert!(router.route("check server status").await.is_none());
    }

    #[tokio::test]
    async fn embedder_failure_returns_none_not_error() {
        let router = SemanticRouter::load(vec![route_def()], Arc::new(StubEmbedder), 0.85)
            .await
            .unwrap();
        let failing = SemanticRouter {
            embedder: Arc::new(FailingEmbedder),
            ..router
        };
        assert!(failing.route("reset password").await.is_none());
    }
}
