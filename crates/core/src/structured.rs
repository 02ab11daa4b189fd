//! Structured output: asking for, and checking, schema-shaped answers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::provider::{Response, StopReason};
use crate::schema;

/// A schema the final answer must conform to.
///
/// Adapters that cannot constrain output natively expose it to the model as
/// a tool named `name`; a call to that tool is the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: schema::normalize(schema),
        }
    }

    /// Infer the schema of `T`.
    pub fn of<T: JsonSchema>() -> Self {
        Self::new(T::schema_name(), schema::schema_for::<T>())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description used when the schema travels as a tool.
    pub fn tool_description(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            "Respond with the final answer by calling this tool with arguments matching its schema."
                .to_string()
        })
    }

    /// Populate `response.parsed` when the response is a final answer.
    ///
    /// Returns `Ok(false)` when the response still asks for other tools.
    pub fn extract(&self, response: &mut Response) -> Result<bool> {
        if let Some(position) = response.tool_calls.iter().position(|c| c.name == self.name) {
            let call = response.tool_calls.remove(position);
            if let Some(err) = response.argument_errors.iter().find(|e| e.call_id == call.id) {
                return Err(Error::StructuredOutput {
                    reason: err.reason.clone(),
                    content: Some(err.raw.clone()),
                });
            }
            let value = Value::Object(call.arguments);
            self.check(&value, response.content.clone())?;
            response.parsed = Some(value);
            response.tool_calls.clear();
            response.stop_reason = StopReason::EndTurn;
            return Ok(true);
        }

        if response.has_tool_calls() {
            return Ok(false);
        }

        let content = response.content.clone().unwrap_or_default();
        let value = parse_json_text(&content).ok_or_else(|| Error::StructuredOutput {
            reason: "response is not valid JSON".into(),
            content: Some(content.clone()),
        })?;
        self.check(&value, Some(content))?;
        response.parsed = Some(value);
        Ok(true)
    }

    fn check(&self, value: &Value, content: Option<String>) -> Result<()> {
        schema::conforms(&self.schema, value).map_err(|reason| Error::StructuredOutput { reason, content })
    }
}

/// Decode JSON out of model text, tolerating code fences and chatter.
pub fn parse_json_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
