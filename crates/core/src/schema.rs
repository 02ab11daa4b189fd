//! JSON Schema helpers for tool parameters and structured output.
//!
//! Tools declare their arguments either through `schemars` (typed closures)
//! or through a list of [`ParamSpec`]s (declarative tools). Both end up as a
//! plain `{"type": "object", "properties": ..., "required": [...]}` value,
//! which is also what arguments are validated against before invocation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// The JSON types a parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Declared metadata for one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// `None` is a declaration error, reported when the schema is built.
    #[serde(rename = "type")]
    pub kind: Option<ParamType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            description: None,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a default. A defaulted parameter is never required.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self.required = false;
        self
    }
}

/// Build an object schema from declared parameters.
pub fn object_schema(tool: &str, params: &[ParamSpec]) -> Result<Value> {
    let schema_error = |reason: String| Error::Schema {
        tool: tool.to_string(),
        reason,
    };

    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        if param.name.trim().is_empty() {
            return Err(schema_error("parameter with an empty name".into()));
        }
        let kind = param
            .kind
            .ok_or_else(|| schema_error(format!("parameter '{}' has no type", param.name)))?;
        if properties.contains_key(&param.name) {
            return Err(schema_error(format!("duplicate parameter '{}'", param.name)));
        }

        let mut property = Map::new();
        property.insert("type".into(), Value::String(kind.as_str().into()));
        if let Some(description) = &param.description {
            property.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(default) = &param.default {
            property.insert("default".into(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(property));

        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    Ok(json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

/// Infer an object schema for an arguments type.
pub fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema).unwrap_or_else(|_| json!({}));
    normalize(value)
}

/// Strip generator metadata and guarantee the object shape providers expect.
pub fn normalize(value: Value) -> Value {
    let mut object = match value {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    object.remove("$schema");
    object.remove("title");
    object
        .entry("type")
        .or_insert_with(|| Value::String("object".into()));
    object
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(Value::Object(properties)) = object.get_mut("properties") {
        for property in properties.values_mut() {
            if let Value::Object(p) = property {
                p.remove("title");
            }
        }
    }
    Value::Object(object)
}

/// Validate call arguments against an object schema, filling declared defaults.
///
/// Unknown arguments are passed through untouched.
pub fn validate_arguments(schema: &Value, mut arguments: Map<String, Value>) -> std::result::Result<Map<String, Value>, String> {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, property) in properties {
        match arguments.get(name) {
            Some(value) => check_type(name, property, value)?,
            None => {
                if let Some(default) = property.get("default") {
                    arguments.insert(name.clone(), default.clone());
                } else if required.contains(&name.as_str()) {
                    return Err(format!("missing required argument '{name}'"));
                }
            }
        }
    }

    for name in required {
        if !arguments.contains_key(name) {
            return Err(format!("missing required argument '{name}'"));
        }
    }

    Ok(arguments)
}

/// Check a complete value against a schema (used for structured output).
pub fn conforms(schema: &Value, value: &Value) -> std::result::Result<(), String> {
    conforms_at("$", schema, value)
}

fn conforms_at(path: &str, schema: &Value, value: &Value) -> std::result::Result<(), String> {
    check_type(path, schema, value)?;

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("{path}: {value} is not one of the allowed values"));
        }
    }

    match value {
        Value::Object(object) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(name) {
                        return Err(format!("{path}: missing required field '{name}'"));
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    if let Some(field) = object.get(name) {
                        conforms_at(&format!("{path}.{name}"), property, field)?;
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    conforms_at(&format!("{path}[{i}]"), item_schema, item)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_type(name: &str, schema: &Value, value: &Value) -> std::result::Result<(), String> {
    let allowed: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };
    if allowed.iter().any(|t| matches_type(t, value)) {
        Ok(())
    } else {
        Err(format!(
            "argument '{name}' should be {}, got {}",
            allowed.join(" or "),
            type_name(value)
        ))
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
