//! Anthropic Messages API adapter.
//!
//! Features:
//! - `x-api-key` header authentication, or bearer auth for `sk-ant-oat` tokens
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Image blocks from URLs or inline base64
//! - Structured output through a forced output tool
//! - Streaming via SSE with `content_block_*` events

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::trace;

use barebone_core::error::{Error, ProviderError, Result};
use barebone_core::message::{Content, ContentBlock, ImageSource, Message, Role};
use barebone_core::provider::*;
use barebone_core::stream::{ProviderEvent, SseEvent, StreamParser};
use barebone_core::tool::ToolCall;

use crate::http::HttpProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic wire format.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn is_oauth_token(&self) -> bool {
        self.api_key.starts_with("sk-ant-oat")
    }

    /// Merge the request's system prompt with any system-role messages.
    fn extract_system(request: &ProviderRequest) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(msg.text()),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic content blocks.
    ///
    /// Consecutive tool results travel in one user message, as the API
    /// requires for parallel tool use.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: match &msg.content {
                            Content::Text(text) => AnthropicContent::Text(text.clone()),
                            Content::Blocks(blocks) => {
                                AnthropicContent::Blocks(blocks.iter().map(to_api_block).collect())
                            }
                        },
                    });
                }
                Role::Assistant => {
                    let text = msg.text();
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(text),
                        });
                    } else {
                        let mut blocks: Vec<ApiBlock> = Vec::new();
                        if !text.is_empty() {
                            blocks.push(ApiBlock::Text { text });
                        }
                        for tc in &msg.tool_calls {
                            blocks.push(ApiBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input: Value::Object(tc.arguments.clone()),
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let block = ApiBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.text(),
                        is_error: msg.is_error,
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user"
                            && blocks.iter().all(|b| matches!(b, ApiBlock::ToolResult { .. })) =>
                        {
                            blocks.push(block);
                        }
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Convert an API response to our Response.
    fn to_response(resp: AnthropicResponse) -> Response {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();
        let mut argument_errors = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        Value::Null => Default::default(),
                        other => {
                            argument_errors.push(MalformedArguments {
                                call_id: id.clone(),
                                tool_name: name.clone(),
                                raw: other.to_string(),
                                reason: "expected a JSON object".into(),
                            });
                            Default::default()
                        }
                    };
                    tool_calls.push(ToolCall { id, name, arguments });
                }
                ResponseContentBlock::Other => {}
            }
        }

        let stop_reason = resp
            .stop_reason
            .as_deref()
            .and_then(map_stop_reason)
            .unwrap_or(if tool_calls.is_empty() {
                StopReason::EndTurn
            } else {
                StopReason::ToolUse
            });

        Response {
            content: (!text_content.is_empty()).then_some(text_content),
            tool_calls,
            stop_reason,
            parsed: None,
            usage: resp
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            model: resp.model,
            argument_errors,
        }
    }
}

fn to_api_block(block: &ContentBlock) -> ApiBlock {
    match block {
        ContentBlock::Text { text } => ApiBlock::Text { text: text.clone() },
        ContentBlock::Image { image } => ApiBlock::Image {
            source: match &image.source {
                ImageSource::Url { url } => json!({"type": "url", "url": url}),
                ImageSource::Base64 { media_type, data } => {
                    json!({"type": "base64", "media_type": media_type, "data": data})
                }
            },
        },
    }
}

fn map_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" => Some(StopReason::EndTurn),
        "tool_use" => Some(StopReason::ToolUse),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        if self.is_oauth_token() {
            headers.push(("authorization".into(), format!("Bearer {}", self.api_key)));
            headers.push(("anthropic-beta".into(), OAUTH_BETA.into()));
        } else {
            headers.push(("x-api-key".into(), self.api_key.clone()));
        }
        headers
    }

    fn encode_request(&self, request: &ProviderRequest, stream: bool) -> Result<Value> {
        let (system, messages) = Self::extract_system(request);
        let api_messages = Self::to_api_messages(&messages);

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        if let Some(ref sys) = system {
            body["system"] = json!(sys);
        }

        let mut tools = Self::to_api_tools(&request.tools);
        if let Some(schema) = &request.output_schema {
            body["tool_choice"] = if tools.is_empty() {
                json!({"type": "tool", "name": schema.name})
            } else {
                json!({"type": "any"})
            };
            tools.push(AnthropicTool {
                name: schema.name.clone(),
                description: schema.tool_description(),
                input_schema: schema.schema.clone(),
            });
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        if !request.stop.is_empty() {
            body["stop_sequences"] = json!(request.stop);
        }

        if stream {
            body["stream"] = json!(true);
        }

        Ok(body)
    }

    fn decode_response(&self, payload: Value) -> Result<Response> {
        let resp: AnthropicResponse = serde_json::from_value(payload).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;
        Ok(Self::to_response(resp))
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(AnthropicStreamParser::default())
    }
}

/// Anthropic addresses streamed blocks by index; tool calls by id.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    tool_blocks: HashMap<u64, String>,
    input_tokens: u32,
}

impl StreamParser for AnthropicStreamParser {
    fn parse(&mut self, event: &SseEvent) -> Result<Vec<ProviderEvent>> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Ok(Vec::new());
            }
        };

        let index = payload["index"].as_u64().unwrap_or(0);
        let mut events = Vec::new();

        match payload["type"].as_str().unwrap_or("") {
            "message_start" => {
                let message = &payload["message"];
                if let Some(model) = message["model"].as_str() {
                    events.push(ProviderEvent::Model(model.to_string()));
                }
                if let Some(input) = message["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = input as u32;
                    let output = message["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                    events.push(ProviderEvent::Usage(Usage::new(self.input_tokens, output)));
                }
            }
            "content_block_start" => {
                let block = &payload["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.tool_blocks.insert(index, id.clone());
                        events.push(ProviderEvent::ToolCallStart { id, name });
                    }
                    Some("text") => {
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(ProviderEvent::Text(text.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &payload["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            events.push(ProviderEvent::Text(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(id), Some(partial)) =
                            (self.tool_blocks.get(&index), delta["partial_json"].as_str())
                        {
                            events.push(ProviderEvent::ToolCallFragment {
                                id: id.clone(),
                                fragment: partial.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(id) = self.tool_blocks.remove(&index) {
                    events.push(ProviderEvent::ToolCallEnd { id });
                }
            }
            "message_delta" => {
                if let Some(reason) = payload["delta"]["stop_reason"].as_str().and_then(map_stop_reason) {
                    events.push(ProviderEvent::Stop(reason));
                }
                if let Some(output) = payload["usage"]["output_tokens"].as_u64() {
                    events.push(ProviderEvent::Usage(Usage::new(self.input_tokens, output as u32)));
                }
            }
            "message_stop" => events.push(ProviderEvent::Completed),
            "error" => {
                let message = payload["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(Error::Provider(ProviderError::StreamInterrupted(message)));
            }
            _ => {}
        }

        Ok(events)
    }
}

/// Anthropic Messages API provider.
pub type AnthropicProvider = HttpProvider<AnthropicAdapter>;

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ApiBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: Value },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use barebone_core::message::ImageContent;
    use barebone_core::structured::OutputSchema;

    fn sse(data: Value) -> SseEvent {
        SseEvent {
            event: data["type"].as_str().map(String::from),
            data: data.to_string(),
        }
    }

    #[test]
    fn headers_for_api_keys_and_oauth_tokens() {
        let key = AnthropicAdapter::new("sk-ant-api03-abc").headers();
        assert!(key.contains(&("x-api-key".into(), "sk-ant-api03-abc".into())));
        assert!(!key.iter().any(|(k, _)| k == "authorization"));

        let oauth = AnthropicAdapter::new("sk-ant-oat01-abc").headers();
        assert!(oauth.contains(&("authorization".into(), "Bearer sk-ant-oat01-abc".into())));
        assert!(oauth.contains(&("anthropic-beta".into(), OAUTH_BETA.into())));
        assert!(!oauth.iter().any(|(k, _)| k == "x-api-key"));
    }

    #[test]
    fn endpoint_with_base_url() {
        let adapter = AnthropicAdapter::new("k").with_base_url("https://custom.proxy.com/");
        assert_eq!(adapter.endpoint(), "https://custom.proxy.com/v1/messages");
    }

    #[test]
    fn system_extraction() {
        let request = ProviderRequest::new(vec![
            Message::system("Be concise"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ])
        .with_system("You are helpful");

        let (system, non_system) = AnthropicAdapter::extract_system(&request);
        assert_eq!(system.as_deref(), Some("You are helpful\n\nBe concise"));
        assert_eq!(non_system.len(), 2);
        assert_eq!(non_system[0].role, Role::User);
    }

    #[test]
    fn encode_tool_round_trip_conversation() {
        let call_a = ToolCall::new("toolu_a", "read", json!({"file_path": "a.txt"}));
        let call_b = ToolCall::new("toolu_b", "read", json!({"file_path": "b.txt"}));
        let request = ProviderRequest::new(vec![
            Message::user("Read both"),
            Message::assistant_with_tool_calls(Some("Reading".into()), vec![call_a, call_b]),
            Message::tool_result("toolu_a", "A", false),
            Message::tool_result("toolu_b", "Error: missing", true),
        ]);

        let body = AnthropicAdapter::new("k").encode_request(&request, false).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["file_path"], "a.txt");

        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_a");
        assert!(results[0].get("is_error").is_none());
        assert_eq!(results[1]["is_error"], true);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn encode_images_and_parameters() {
        let images = vec![
            ImageContent::parse("https://example.com/cat.png").unwrap(),
            ImageContent::parse("data:image/jpeg;base64,/9j/4AAQ").unwrap(),
        ];
        let mut request = ProviderRequest::new(vec![Message::user_with_images("What?", images)]);
        request.temperature = Some(0.2);
        request.stop = vec!["END".into()];
        request.max_tokens = 100;

        let body = AnthropicAdapter::new("k")
            .with_model("claude-test")
            .encode_request(&request, true)
            .unwrap();
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stop_sequences"], json!(["END"]));
        assert_eq!(body["stream"], true);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0], json!({"type": "text", "text": "What?"}));
        assert_eq!(content[1]["source"], json!({"type": "url", "url": "https://example.com/cat.png"}));
        assert_eq!(content[2]["source"]["media_type"], "image/jpeg");
    }

    #[test]
    fn tool_declarations_keep_order_and_output_tool_is_forced() {
        let tool = |name: &str| ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {}}),
        };
        let schema = OutputSchema::new("answer", json!({"type": "object", "properties": {"x": {"type": "integer"}}}));

        let only_schema = ProviderRequest::new(vec![Message::user("x")]).with_output_schema(schema.clone());
        let body = AnthropicAdapter::new("k").encode_request(&only_schema, false).unwrap();
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "answer"}));
        assert_eq!(body["tools"][0]["name"], "answer");

        let with_tools = ProviderRequest::new(vec![Message::user("x")])
            .with_tools(vec![tool("zeta"), tool("alpha")])
            .with_output_schema(schema);
        let body = AnthropicAdapter::new("k").encode_request(&with_tools, false).unwrap();
        let names: Vec<_> = body["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "answer"]);
        assert_eq!(body["tool_choice"], json!({"type": "any"}));
    }

    #[test]
    fn decode_text_response() {
        let response = AnthropicAdapter::new("k")
            .decode_response(json!({
                "id": "msg_01",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }))
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Hello!"));
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.usage.unwrap().total_tokens, 15);
        assert_eq!(response.model.as_deref(), Some("claude-sonnet-4-20250514"));
    }

    #[test]
    fn decode_tool_use_without_usage() {
        let response = AnthropicAdapter::new("k")
            .decode_response(json!({
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Let me look"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "grep", "input": {"pattern": "fn"}}
                ],
                "stop_reason": "tool_use"
            }))
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Let me look"));
        assert_eq!(response.tool_calls[0].id, "toolu_abc");
        assert_eq!(response.tool_calls[0].arguments["pattern"], "fn");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert!(response.usage.is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = AnthropicAdapter::new("k")
            .decode_response(json!({"content": "nope"}))
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn stream_parser_maps_block_events() {
        let mut parser = AnthropicStreamParser::default();
        let mut events = Vec::new();
        for data in [
            json!({"type": "message_start", "message": {"model": "claude-x", "usage": {"input_tokens": 12, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"command\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"ls\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "ping"}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 20}}),
            json!({"type": "message_stop"}),
        ] {
            events.extend(parser.parse(&sse(data)).unwrap());
        }

        assert_eq!(
            events,
            vec![
                ProviderEvent::Model("claude-x".into()),
                ProviderEvent::Usage(Usage::new(12, 1)),
                ProviderEvent::Text("Hi".into()),
                ProviderEvent::ToolCallStart { id: "toolu_1".into(), name: "bash".into() },
                ProviderEvent::ToolCallFragment { id: "toolu_1".into(), fragment: "{\"command\":".into() },
                ProviderEvent::ToolCallFragment { id: "toolu_1".into(), fragment: "\"ls\"}".into() },
                ProviderEvent::ToolCallEnd { id: "toolu_1".into() },
                ProviderEvent::Stop(StopReason::ToolUse),
                ProviderEvent::Usage(Usage::new(12, 20)),
                ProviderEvent::Completed,
            ]
        );
    }

    #[test]
    fn stream_parser_surfaces_errors() {
        let mut parser = AnthropicStreamParser::default();
        let err = parser
            .parse(&sse(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})))
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
