//! Sub-intent refinement (§3 RefinementRule, §4.6 step 3): narrows a
//! sub_intent using only rules and already-extracted fields. Never calls
//! a classifier, and is structurally incapable of changing
//! `intent_category` — it only ever returns a new sub_intent string,
//! which the caller assigns onto the same `RoutingDecision.intent_category`.

use crate::rules::{ConditionDef, RefinementRuleDef};
use crate::types::ExtractedFields;

enum CompiledCondition {
    Equals { field: String, value: String },
    Contains { field: String, value: String },
}

impl CompiledCondition {
    fn holds(&self, fields: &ExtractedFields) -> bool {
        match self {
            Self::Equals { field, value } => fields
                .get(field)
                .and_then(|v| v.as_str())
                .map(|actual| actual == value)
                .unwrap_or(false),
            Self::Contains { field, value } => fields
                .get(field)
                .and_then(|v| v.as_str())
                .map(|actual| actual.to_ascii_lowercase().contains(&value.to_ascii_lowercase()))
                .unwrap_or(false),
        }
    }
}

struct CompiledBranch {
    conditions: Vec<CompiledCondition>,
    target_sub_intent: String,
}

struct CompiledRule {
    from_sub_intent: String,
    branches: Vec<CompiledBranch>,
}

/// Compiled `RefinementRule` table, one entry per `from_sub_intent` (§3).
pub struct RefinementTable {
    rules: Vec<CompiledRule>,
}

fn compile_condition(def: &ConditionDef) -> CompiledCondition {
    match def {
        ConditionDef::Equals { field, value } => CompiledCondition::Equals {
            field: field.clone(),
            value: value.clone(),
        },
        ConditionDef::Contains { field, value } => CompiledCondition::Contains {
            field: field.clone(),
            value: value.clone(),
        },
    }
}

impl RefinementTable {
    pub fn load(defs: Vec<RefinementRuleDef>) -> Self {
        let rules = defs
            .into_iter()
            .map(|def| CompiledRule {
                from_sub_intent: def.from_sub_intent,
                branches: def
                    .branches
                    .into_iter()
                    .map(|b| CompiledBranch {
                        conditions: b.conditions.iter().map(compile_condition).collect(),
                        target_sub_intent: b.target_sub_intent,
                    })
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    /// Evaluates the branches for `from_sub_intent` in order; the first
    /// branch whose conjunction of conditions all hold against `fields`
    /// wins. Returns `None` (no refinement) when no rule or no branch
    /// matches — the sub_intent is then left unchanged by the caller.
    pub fn refine(&self, from_sub_intent: &str, fields: &ExtractedFields) -> Option<String> {
        let rule = self.rules.iter().find(|r| r.from_sub_intent == from_sub_intent)?;
        rule.branches
            .iter()
            .find(|branch| branch.conditions.iter().all(|c| c.holds(fields)))
            .map(|branch| branch.target_sub_intent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RefinementBranchDef;
    use serde_json::json;

    fn table() -> RefinementTable {
        RefinementTable::load(vec![RefinementRuleDef {
            from_sub_intent: "general_request".into(),
            branches: vec![
                RefinementBranchDef {
                    conditions: vec![ConditionDef::Contains {
                        field: "justification".into(),
                        value: "gitlab".into(),
                    }],
                    target_sub_intent: "account_request".into(),
                },
                RefinementBranchDef {
                    conditions: vec![ConditionDef::Equals {
                        field: "resource_type".into(),
                        value: "vpn".into(),
                    }],
                    target_sub_intent: "vpn_access_request".into(),
                },
            ],
        }])
    }

    #[test]
    fn first_matching_branch_wins() {
        let table = table();
        let mut fields = ExtractedFields::new();
        fields.insert("justification".into(), json!("new project needs GitLab access"));
        assert_eq!(
            table.refine("general_request", &fields),
            Some("account_request".to_string())
        );
    }

    #[test]
    fn no_matching_branch_returns_none() {
        let table = table();
        let fields = ExtractedFields::new();
        assert_eq!(table.refine("general_request", &fields), None);
    }

    #[test]
    fn unknown_from_sub_intent_returns_none() {
        let table = table();
        let mut fields = ExtractedFields::new();
        fields.insert("resource_type".into(), json!("vpn"));
        assert_eq!(table.refine("etl_failure", &fields), None);
    }
}
