//! `QuestionGenerator` (§4.6): a pure, templated function from missing
//! field keys to user-facing questions. No LLM involved.

use crate::rules::QuestionTemplateDef;
use std::collections::HashMap;

/// One question the dialog asks the user, tied to the field key it's
/// trying to fill.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub field_key: String,
    pub text: String,
}

/// Per-field template table, keyed by field key (§4.6).
pub struct QuestionGenerator {
    templates: HashMap<String, String>,
}

fn default_template(field_key: &str) -> String {
    format!("Could you provide the {}?", field_key.replace('_', " "))
}

impl QuestionGenerator {
    pub fn load(defs: Vec<QuestionTemplateDef>) -> Self {
        Self {
            templates: defs.into_iter().map(|d| (d.field_key, d.template)).collect(),
        }
    }

    /// Emits one question per missing field, in the order `missing_fields`
    /// is given (which `CompletenessInfo` already preserves in rule
    /// definition order, §3, §4.4). Falls back to a generic template for
    /// fields with no specific entry.
    pub fn questions_for(&self, missing_fields: &[String]) -> Vec<Question> {
        missing_fields
            .iter()
            .map(|field_key| Question {
                field_key: field_key.clone(),
                text: self
                    .templates
                    .get(field_key)
                    .cloned()
                    .unwrap_or_else(|| default_template(field_key)),
            })
            .collect()
    }
}
