use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};

/// Shape of the final structured result of a run. The schema is a JSON
/// schema fragment; conformance checking is structural (type keywords,
/// required properties) rather than a full validator, since providers with
/// native structured output already constrain generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new<N: Into<String>>(name: N, schema: Value) -> Self {
        OutputSchema {
            name: name.into(),
            schema,
        }
    }

    /// Check that a value structurally conforms to the schema.
    pub fn conforms(&self, value: &Value) -> AgentResult<()> {
        check(&self.schema, value, "$")
            .map_err(|detail| AgentError::SchemaValidation(format!("{}: {}", self.name, detail)))
    }
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };

    let matches = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        other => return Err(format!("unsupported schema type '{}' at {}", other, path)),
    };
    if !matches {
        return Err(format!("expected {} at {}", expected, path));
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("missing required property '{}' at {}", key, path));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, subschema) in properties {
                if let Some(subvalue) = object.get(key) {
                    check(subschema, subvalue, &format!("{}.{}", path, key))?;
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(subschema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                check(subschema, item, &format!("{}[{}]", path, index))?;
            }
        }
    }

    Ok(())
}
