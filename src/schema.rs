//! Structured-output schema handling.
//!
//! Accepts a response-format document in any of the shapes users tend to
//! paste (full `response_format`, a `json_schema` wrapper, or a bare JSON
//! schema) and derives the [`SchemaSpec`] the confidence extractor needs.

use serde_json::{Map, Value, json};

use crate::error::ClassifyError;

/// Property key assumed when the schema declares none.
pub const DEFAULT_PROPERTY_KEY: &str = "classification";

/// What the confidence extractor needs from the schema: top-level property
/// names in declaration order and every enumerated value, flattened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSpec {
    pub property_keys: Vec<String>,
    pub enum_values: Vec<String>,
}

impl SchemaSpec {
    pub fn new(property_keys: Vec<String>, enum_values: Vec<String>) -> Self {
        Self {
            property_keys,
            enum_values,
        }
    }

    /// Derives the spec from a normalized `response_format` (or any of the
    /// shapes [`normalize_response_format`] accepts).
    pub fn from_response_format(response_format: &Value) -> Self {
        let normalized = normalize_response_format(response_format.clone());
        let Some(schema) = normalized.pointer("/json_schema/schema") else {
            return Self::default();
        };

        let mut enum_values = Vec::new();
        collect_enum(schema, &mut enum_values);

        let mut property_keys = Vec::new();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop) in props {
                property_keys.push(key.clone());
                collect_enum(prop, &mut enum_values);
            }
        }

        Self::new(property_keys, enum_values)
    }

    /// Keys used for key-anchored search, falling back to `classification`.
    pub fn search_keys(&self) -> Vec<&str> {
        if self.property_keys.is_empty() {
            vec![DEFAULT_PROPERTY_KEY]
        } else {
            self.property_keys.iter().map(String::as_str).collect()
        }
    }
}

fn collect_enum(schema: &Value, out: &mut Vec<String>) {
    let Some(values) = schema.get("enum").and_then(Value::as_array) else {
        return;
    };
    for value in values {
        let text = plain_string(value);
        if !out.contains(&text) {
            out.push(text);
        }
    }
}

/// Parses schema text and wraps it into a `response_format` document.
pub fn parse_response_format(text: &str) -> Result<Value, ClassifyError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ClassifyError::Schema(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ClassifyError::Schema("schema must be a JSON object".into()));
    }
    Ok(normalize_response_format(value))
}

/// Brings a schema into `{"type": "json_schema", "json_schema": {...}}` form.
///
/// A bare JSON schema is wrapped with name `classification` and strict mode on.
pub fn normalize_response_format(value: Value) -> Value {
    let is_full = value.get("type").and_then(Value::as_str) == Some("json_schema")
        && value.get("json_schema").is_some();
    if is_full {
        return value;
    }

    if value.pointer("/json_schema/schema").is_some() {
        let inner = value.get("json_schema").cloned().unwrap_or(Value::Null);
        return json!({ "type": "json_schema", "json_schema": inner });
    }

    json!({
        "type": "json_schema",
        "json_schema": {
            "name": DEFAULT_PROPERTY_KEY,
            "strict": true,
            "schema": value,
        }
    })
}

/// Reads the classification value out of a structured output.
///
/// Looks at `classification` first, then the `p1`/`p2`/`p3` multi-slot
/// layout, then the first property. Raw-text outputs are returned as is.
pub fn classification_value(output: Option<&Value>) -> String {
    match output {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::Object(obj)) => object_classification(obj),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn object_classification(obj: &Map<String, Value>) -> String {
    if let Some(value) = obj.get(DEFAULT_PROPERTY_KEY) {
        return plain_string(value);
    }

    if obj.contains_key("p1") {
        return ["p1", "p2", "p3"]
            .iter()
            .filter_map(|slot| {
                let value = obj.get(*slot)?;
                is_truthy(value).then(|| format!("{slot}:{}", plain_string(value)))
            })
            .collect::<Vec<_>>()
            .join(", ");
    }

    match obj.values().next() {
        Some(first) => plain_string(first),
        None => "{}".to_string(),
    }
}

/// String form of a JSON scalar without quotes; containers stay JSON.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
