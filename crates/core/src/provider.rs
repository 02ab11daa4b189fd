//! Provider trait: the abstraction over LLM backends.
//!
//! A [`Provider`] sends a conversation to a model and gets a [`Response`]
//! back, either complete or as a stream of [`StreamEvent`]s.
//!
//! The wire format of a vendor lives behind [`ProviderAdapter`]: a pure codec
//! (endpoint, request encoding, response decoding, stream parsing) that the
//! HTTP provider in `barebone-providers` drives over a shared transport.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::stream::{StreamEvent, StreamParser};
use crate::structured::OutputSchema;
use crate::tool::ToolCall;

/// Default output budget when the caller sets none.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Everything one provider round needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// System prompt, sent the way the vendor expects it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Available tools, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature; vendor default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Schema the final answer must conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<OutputSchema>,
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
            tools: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            stop: Vec::new(),
            output_schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Combine partial reports; vendors split usage across stream events.
    pub fn merge(self, other: Usage) -> Usage {
        Usage::new(
            self.prompt_tokens.max(other.prompt_tokens),
            self.completion_tokens.max(other.completion_tokens),
        )
    }
}

/// Tool call arguments that did not decode or validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedArguments {
    pub call_id: String,
    pub tool_name: String,
    /// The raw argument text as received
    pub raw: String,
    pub reason: String,
}

impl std::fmt::Display for MalformedArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Malformed arguments for tool '{}' (call {}): {}",
            self.tool_name, self.call_id, self.reason
        )
    }
}

/// Terminal output of one provider round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Generated text, if any
    pub content: Option<String>,

    /// Tool calls in the order the model issued them
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    pub stop_reason: StopReason,

    /// Decoded structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,

    /// Absent when the provider did not report usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tool calls whose arguments failed to decode or validate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argument_errors: Vec<MalformedArguments>,
}

impl Response {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        if !tool_calls.is_empty() {
            self.stop_reason = StopReason::ToolUse;
        }
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The argument error reported for a call, if any.
    pub fn argument_error(&self, call_id: &str) -> Option<&MalformedArguments> {
        self.argument_errors.iter().find(|e| e.call_id == call_id)
    }

    /// Deserialize the structured output into a typed value.
    pub fn parse_into<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = self.parsed.clone().ok_or_else(|| Error::StructuredOutput {
            reason: "response carries no structured output".into(),
            content: self.content.clone(),
        })?;
        serde_json::from_value(parsed).map_err(|e| Error::StructuredOutput {
            reason: e.to_string(),
            content: self.content.clone(),
        })
    }
}

/// Decode a tool call's raw argument text into an object.
///
/// Empty text means "no arguments".
pub fn parse_tool_arguments(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

/// Receiving half of a provider stream.
pub type EventReceiver = mpsc::Receiver<Result<StreamEvent>>;

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// vendor is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openrouter").
    fn name(&self) -> &str;

    /// The model requests are sent to.
    fn model(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<Response>;

    /// Send a request and get a stream of events ending in `Done`.
    ///
    /// Default implementation calls `complete()` and replays the result as events.
    async fn stream(&self, request: ProviderRequest) -> Result<EventReceiver> {
        let response = self.complete(request).await?;
        let events = replay_events(response);
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(Ok(event)).await;
        }
        Ok(rx)
    }

    /// Release pooled connections. Later requests reacquire them.
    async fn close(&self) {}
}

/// The event sequence equivalent to a complete response.
pub fn replay_events(response: Response) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(text) = response.content.as_deref().filter(|t| !t.is_empty()) {
        events.push(StreamEvent::TextDelta {
            text: text.to_string(),
        });
    }
    for call in &response.tool_calls {
        events.push(StreamEvent::ToolCallDelta {
            id: call.id.clone(),
            name: Some(call.name.clone()),
            argument_fragment: Some(Value::Object(call.arguments.clone()).to_string()),
        });
    }
    events.push(StreamEvent::Done {
        response: Box::new(response),
    });
    events
}

/// A vendor wire format.
///
/// Adapters are pure: they hold static configuration and never touch the
/// network, so they are cheap to test against recorded payloads.
pub trait ProviderAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Full URL requests are posted to.
    fn endpoint(&self) -> String;

    /// Authentication and versioning headers.
    fn headers(&self) -> Vec<(String, String)>;

    /// Map a request to the vendor body.
    fn encode_request(&self, request: &ProviderRequest, stream: bool) -> Result<Value>;

    /// Map a complete vendor payload to a response.
    fn decode_response(&self, payload: Value) -> Result<Response>;

    /// A fresh parser for one streamed response.
    fn stream_parser(&self) -> Box<dyn StreamParser>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedProvider;

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        fn model(&self) -> &str {
            "canned-1"
        }
        async fn complete(&self, _request: ProviderRequest) -> Result<Response> {
            Ok(Response::text("Hi")
                .with_tool_calls(vec![ToolCall::new("c1", "echo", json!({"text": "x"}))]))
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest::new(vec![Message::user("hi")]);
        assert_eq!(req.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(req.temperature.is_none());
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "bash".into(),
            description: "Execute a shell command".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("bash"));
        assert!(json.contains("command"));
    }

    #[test]
    fn parse_arguments_edge_cases() {
        assert!(parse_tool_arguments("").unwrap().is_empty());
        assert_eq!(parse_tool_arguments(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(parse_tool_arguments(r#"{"a":"#).unwrap_err().contains("invalid JSON"));
        assert!(parse_tool_arguments("[1]").unwrap_err().contains("object"));
    }

    #[test]
    fn usage_merges_partial_reports() {
        let merged = Usage::new(12, 0).merge(Usage::new(0, 30));
        assert_eq!(merged, Usage::new(12, 30));
        assert_eq!(merged.total_tokens, 42);
    }

    #[test]
    fn parse_into_requires_structured_output() {
        #[derive(Deserialize)]
        struct Answer {
            value: u32,
        }

        let mut response = Response::text(r#"{"value": 7}"#);
        assert!(matches!(
            response.parse_into::<Answer>(),
            Err(Error::StructuredOutput { .. })
        ));
        response.parsed = Some(json!({"value": 7}));
        assert_eq!(response.parse_into::<Answer>().unwrap().value, 7);
    }

    #[tokio::test]
    async fn default_stream_replays_complete() {
        let mut rx = CannedProvider
            .stream(ProviderRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "Hi"));
        assert!(matches!(
            &events[1],
            StreamEvent::ToolCallDelta { id, name: Some(n), .. } if id == "c1" && n == "echo"
        ));
        match &events[2] {
            StreamEvent::Done { response } => assert_eq!(response.stop_reason, StopReason::ToolUse),
            other => panic!("expected done, got {other:?}"),
        }
    }
}
