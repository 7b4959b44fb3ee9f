//! C8a RiskAssessor (§4.8): deterministic risk scoring from a
//! category baseline plus multiplicative adjustments.

use crate::types::{IntentCategory, RequestContext, RiskLevel};
use serde::{Deserialize, Serialize};

/// One entry in the ordered audit trail of adjustments applied to the
/// baseline score (§4.8 `factors[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub delta: f64,
}

/// Output of `RiskAssessor::assess` (§4.8, §6.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub score: f64,
    pub requires_approval: bool,
    pub factors: Vec<RiskFactor>,
    pub reasoning: String,
}

fn baseline_score(category: IntentCategory) -> f64 {
    match category {
        IntentCategory::Incident | IntentCategory::Change => 0.65,
        IntentCategory::Request => 0.40,
        IntentCategory::Query | IntentCategory::Unknown => 0.15,
    }
}

fn baseline_level(category: IntentCategory) -> RiskLevel {
    match category {
        IntentCategory::Incident | IntentCategory::Change => RiskLevel::High,
        IntentCategory::Request => RiskLevel::Medium,
        IntentCategory::Query | IntentCategory::Unknown => RiskLevel::Low,
    }
}

/// Sub-intents whose presence always forces `Critical`, bypassing the
/// bucketed score entirely (§4.8 "Sub-intent overrides").
const CRITICAL_SUB_INTENT_OVERRIDES: &[&str] = &["system_down", "system_unavailable", "data_breach"];

fn level_from_score(score: f64) -> RiskLevel {
    if score <= 0.25 {
        RiskLevel::Low
    } else if score <= 0.55 {
        RiskLevel::Medium
    } else if score <= 0.80 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

/// Deterministic risk scoring (§4.8): a category baseline, multiplied by
/// environment/weekend/urgency adjusters, then bucketed — unless a
/// sub-intent override forces `Critical` outright.
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(
        &self,
        category: IntentCategory,
        sub_intent: &str,
        context: &RequestContext,
    ) -> RiskAssessment {
        if CRITICAL_SUB_INTENT_OVERRIDES.contains(&sub_intent) {
            return RiskAssessment {
                risk_level: RiskLevel::Critical,
                score: 1.0,
                requires_approval: true,
                factors: vec![RiskFactor {
                    name: format!("sub_intent_override:{sub_intent}"),
                    delta: 1.0,
                }],
                reasoning: format!(
                    "sub_intent '{sub_intent}' is on the forced-critical override list"
                ),
            };
        }

        let mut score = baseline_score(category);
        let mut factors = vec![RiskFactor {
            name: format!("baseline:{}", category.as_str()),
            delta: score,
        }];

        let mut note = |name: &str, multiplier: f64, score: &mut f64, factors: &mut Vec<RiskFactor>| {
            let before = *score;
            *score *= multiplier;
            factors.push(RiskFactor {
                name: name.to_string(),
                delta: *score - before,
            });
        };

        match context.environment.as_deref() {
            Some("production") => note("environment:production", 1.3, &mut score, &mut factors),
            Some("staging") => note("environment:staging", 1.0, &mut score, &mut factors),
            _ => {}
        }
        if context.is_weekend {
            note("weekend", 1.2, &mut score, &mut factors);
        }
        if context.is_urgent {
            note("urgent", 1.2, &mut score, &mut factors);
        }

        let score = score.min(1.0);
        let risk_level = level_from_score(score);
        let baseline_matches = risk_level == baseline_level(category) && factors.len() == 1;

        let reasoning = if baseline_matches {
            format!(
                "{} category baseline places this at {:?} risk",
                category.as_str(),
                risk_level
            )
        } else {
            format!(
                "{} category baseline adjusted by {} factor(s) to {:?} risk (score {:.2})",
                category.as_str(),
                factors.len() - 1,
                risk_level,
                score
            )
        };

        RiskAssessment {
            risk_level,
            score,
            requires_approval: matches!(risk_level, RiskLevel::High | RiskLevel::Critical),
            factors,
            reasoning,
        }
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_baseline_is_high_with_no_context() {
        let assessor = RiskAssessor::new();
        let assessment = assessor.assess(
            IntentCategory::Incident,
            "etl_failure",
            &RequestContext::default(),
        );
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert!(assessment.requires_approval);
    }

    #[test]
    fn query_baseline_is_low_and_does_not_require_approval() {
        let assessor = RiskAssessor::new();
        let assessment = assessor.assess(
            IntentCategory::Query,
            "status_check",
            &RequestContext::default(),
        );
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(!assessment.requires_approval);
    }

    #[test]
    fn production_and_weekend_adjusters_compound() {
        let assessor = RiskAssessor::new();
        let context = RequestContext {
            environment: Some("production".into()),
            is_weekend: true,
            is_urgent: false,
            extra: Default::default(),
        };
        let assessment = assessor.assess(IntentCategory::Request, "account_request", &context);
        // 0.40 * 1.3 * 1.2 = 0.624 -> High
        assert!((assessment.score - 0.624).abs() < 1e-9);
        assert_eq!(assessment.risk_level, RiskLevel::High);
    }

    #[test]
    fn sub_intent_override_forces_critical_regardless_of_context() {
        let assessor = RiskAssessor::new();
        let assessment = assessor.assess(
            IntentCategory::Query,
            "system_down",
            &RequestContext::default(),
        );
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert!(assessment.requires_approval);
    }

    #[test]
    fn assessment_is_deterministic_for_identical_inputs() {
        let assessor = RiskAssessor::new();
        let context = RequestContext {
            environment: Some("production".into()),
            is_weekend: false,
            is_urgent: true,
            extra: Default::default(),
        };
        let a = assessor.assess(IntentCategory::Change, "release_deployment", &context);
        let b = assessor.assess(IntentCategory::Change, "release_deployment", &context);
        assert_eq!(a, b);
    }
}
