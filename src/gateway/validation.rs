//! Declarative schema validation for inbound system requests (§4.7): a
//! required/optional field list plus, for nested list fields, the
//! required fields of each element. No regex, no coercion — a field is
//! either present with a non-null value or it isn't.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field requirement: a plain scalar key, or a list whose elements
/// must each carry their own required keys (e.g. Prometheus `alerts[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub key: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nested_required: Vec<String>,
}

/// A request body schema: a flat list of `FieldSchema`s checked against a
/// top-level JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestSchema {
    pub fields: Vec<FieldSchema>,
}

impl RequestSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Returns the first violation found, in field-definition order.
    pub fn validate(&self, body: &Value) -> Result<(), String> {
        let Value::Object(map) = body else {
            return Err("request body must be a JSON object".to_string());
        };

        for field in &self.fields {
            let Some(value) = map.get(&field.key) else {
                if field.required {
                    return Err(format!("missing required field: {}", field.key));
                }
                continue;
            };
            if value.is_null() {
                if field.required {
                    return Err(format!("field '{}' must not be null", field.key));
                }
                continue;
            }

            if !field.nested_required.is_empty() {
                let Value::Array(items) = value else {
                    return Err(format!("field '{}' must be an array", field.key));
                };
                for (index, item) in items.iter().enumerate() {
                    for nested_key in &field.nested_required {
                        let present = item.get(nested_key).is_some_and(|v| !v.is_null());
                        if !present {
                            return Err(format!(
                                "field '{}[{index}]' missing required nested field: {nested_key}",
                                field.key
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
