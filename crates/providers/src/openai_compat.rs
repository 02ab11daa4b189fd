//! OpenAI-compatible chat completions adapter.
//!
//! Works with OpenAI, OpenRouter, and any endpoint exposing
//! `/chat/completions` with function calling.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Image parts via `image_url`
//! - Structured output via `response_format`

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

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI chat completions wire format.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    name: String,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompatAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", OPENAI_BASE_URL, api_key, "gpt-4o")
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL, api_key, "anthropic/claude-sonnet-4")
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(request: &ProviderRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ApiMessage::plain("system", system.clone()));
        }

        for m in &request.messages {
            let role = m.role.as_str().to_string();
            let content = match (&m.role, &m.content) {
                (Role::User, Content::Blocks(blocks)) => {
                    Some(Value::Array(blocks.iter().map(to_api_part).collect()))
                }
                _ => {
                    let text = m.text();
                    // Assistant turns that only call tools carry null content.
                    if text.is_empty() && !m.tool_calls.is_empty() {
                        None
                    } else {
                        Some(Value::String(text))
                    }
                }
            };

            messages.push(ApiMessage {
                role,
                content,
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: Value::Object(tc.arguments.clone()).to_string(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            });
        }

        messages
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

fn to_api_part(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { image } => {
            let url = match &image.source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            };
            json!({"type": "image_url", "image_url": {"url": url}})
        }
    }
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".into(), format!("Bearer {}", self.api_key)),
            ("Content-Type".into(), "application/json".into()),
        ]
    }

    fn encode_request(&self, request: &ProviderRequest, stream: bool) -> Result<Value> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::to_api_messages(request),
            "max_tokens": request.max_tokens,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_api_tools(&request.tools))?;
        }

        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }

        if let Some(schema) = &request.output_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                },
            });
        }

        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }

        Ok(body)
    }

    fn decode_response(&self, payload: Value) -> Result<Response> {
        let api_response: ApiResponse = serde_json::from_value(payload).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse {} response: {e}", self.name))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let mut tool_calls = Vec::new();
        let mut argument_errors = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            let arguments = match parse_tool_arguments(&tc.function.arguments) {
                Ok(arguments) => arguments,
                Err(reason) => {
                    argument_errors.push(MalformedArguments {
                        call_id: tc.id.clone(),
                        tool_name: tc.function.name.clone(),
                        raw: tc.function.arguments.clone(),
                        reason,
                    });
                    Default::default()
                }
            };
            tool_calls.push(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            });
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some(reason) => map_finish_reason(reason),
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        Ok(Response {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            stop_reason,
            parsed: None,
            usage: api_response
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            model: api_response.model,
            argument_errors,
        })
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(OpenAiStreamParser::default())
    }
}

/// Chat completion chunks address tool calls by index; the id arrives once.
#[derive(Debug, Default)]
pub struct OpenAiStreamParser {
    ids: HashMap<u64, String>,
    order: Vec<String>,
    model_seen: bool,
}

impl StreamParser for OpenAiStreamParser {
    fn parse(&mut self, event: &SseEvent) -> Result<Vec<ProviderEvent>> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(vec![ProviderEvent::Completed]);
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
                return Ok(Vec::new());
            }
        };

        if let Some(error) = chunk.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown stream error").to_string();
            return Err(Error::Provider(ProviderError::StreamInterrupted(message)));
        }

        let mut events = Vec::new();

        if !self.model_seen {
            if let Some(model) = chunk["model"].as_str() {
                self.model_seen = true;
                events.push(ProviderEvent::Model(model.to_string()));
            }
        }

        if let Some(choice) = chunk["choices"].get(0) {
            let delta = &choice["delta"];

            if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
                events.push(ProviderEvent::Text(text.to_string()));
            }

            for tc in delta["tool_calls"].as_array().into_iter().flatten() {
                let index = tc["index"].as_u64().unwrap_or(0);
                let id = match self.ids.get(&index) {
                    Some(id) => id.clone(),
                    None => {
                        let id = tc["id"]
                            .as_str()
                            .filter(|id| !id.is_empty())
                            .map(String::from)
                            .unwrap_or_else(|| format!("call_{index}"));
                        let name = tc["function"]["name"].as_str().unwrap_or_default().to_string();
                        self.ids.insert(index, id.clone());
                        self.order.push(id.clone());
                        events.push(ProviderEvent::ToolCallStart { id: id.clone(), name });
                        id
                    }
                };
                if let Some(fragment) = tc["function"]["arguments"].as_str().filter(|f| !f.is_empty()) {
                    events.push(ProviderEvent::ToolCallFragment {
                        id,
                        fragment: fragment.to_string(),
                    });
                }
            }

            if let Some(reason) = choice["finish_reason"].as_str() {
                for id in self.order.drain(..) {
                    events.push(ProviderEvent::ToolCallEnd { id });
                }
                events.push(ProviderEvent::Stop(map_finish_reason(reason)));
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            events.push(ProviderEvent::Usage(Usage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            )));
        }

        Ok(events)
    }
}

/// OpenAI-compatible provider.
pub type OpenAiCompatProvider = HttpProvider<OpenAiCompatAdapter>;

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn plain(role: &str, content: String) -> Self {
        Self {
            role: role.into(),
            content: Some(Value::String(content)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
