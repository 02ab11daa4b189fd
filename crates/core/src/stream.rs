//! Stream events and the per-response streaming decoder.
//!
//! Vendor parsers turn server-sent events into [`ProviderEvent`]s; the
//! [`StreamDecoder`] folds those into caller-facing [`StreamEvent`]s and,
//! once the provider signals completion, a single terminal `Done` carrying
//! the assembled [`Response`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::provider::{MalformedArguments, Response, StopReason, ToolDefinition, Usage, parse_tool_arguments};
use crate::schema;
use crate::tool::ToolCall;

/// An event delivered to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta { text: String },

    /// A tool call started (`name` set) or received an argument fragment.
    ToolCallDelta {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        argument_fragment: Option<String>,
    },

    /// The assembled response. Always the last event of a stream.
    Done { response: Box<Response> },
}

/// One server-sent event as framed off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when the server names its events
    pub event: Option<String>,
    /// The joined `data:` lines
    pub data: String,
}

/// Vendor-neutral stream events produced by a [`StreamParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Text(String),
    ToolCallStart { id: String, name: String },
    ToolCallFragment { id: String, fragment: String },
    ToolCallEnd { id: String },
    Usage(Usage),
    Stop(StopReason),
    Model(String),
    /// The provider's own end-of-response signal.
    Completed,
}

/// Maps one vendor's server-sent events to [`ProviderEvent`]s.
///
/// Parsers are stateful per response (vendors address tool calls by index
/// or block number, not by id).
pub trait StreamParser: Send {
    fn parse(&mut self, event: &SseEvent) -> Result<Vec<ProviderEvent>>;
}

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Receiving,
    Finalizing,
    Terminal,
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    closed: bool,
}

/// Folds provider events into stream events for a single response.
#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
    text: String,
    calls: Vec<PendingCall>,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
    model: Option<String>,
    schemas: HashMap<String, Value>,
}

impl StreamDecoder {
    /// A decoder that validates finished calls against `tools` when it can.
    pub fn new(tools: &[ToolDefinition]) -> Self {
        Self {
            state: DecoderState::Idle,
            text: String::new(),
            calls: Vec::new(),
            usage: None,
            stop_reason: None,
            model: None,
            schemas: tools
                .iter()
                .map(|t| (t.name.clone(), t.parameters.clone()))
                .collect(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == DecoderState::Terminal
    }

    /// Apply one provider event; returns the stream event it produces, if any.
    ///
    /// Events after the terminal `Done` are ignored.
    pub fn push(&mut self, event: ProviderEvent) -> Option<StreamEvent> {
        match self.state {
            DecoderState::Terminal | DecoderState::Finalizing => return None,
            DecoderState::Idle => self.state = DecoderState::Receiving,
            DecoderState::Receiving => {}
        }

        match event {
            ProviderEvent::Text(text) => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(StreamEvent::TextDelta { text })
            }
            ProviderEvent::ToolCallStart { id, name } => {
                match self.calls.iter_mut().find(|c| c.id == id) {
                    Some(call) => call.name = name.clone(),
                    None => self.calls.push(PendingCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                        closed: false,
                    }),
                }
                Some(StreamEvent::ToolCallDelta {
                    id,
                    name: Some(name),
                    argument_fragment: None,
                })
            }
            ProviderEvent::ToolCallFragment { id, fragment } => {
                if fragment.is_empty() {
                    return None;
                }
                match self.calls.iter_mut().find(|c| c.id == id) {
                    Some(call) => call.arguments.push_str(&fragment),
                    None => self.calls.push(PendingCall {
                        id: id.clone(),
                        name: String::new(),
                        arguments: fragment.clone(),
                        closed: false,
                    }),
                }
                Some(StreamEvent::ToolCallDelta {
                    id,
                    name: None,
                    argument_fragment: Some(fragment),
                })
            }
            ProviderEvent::ToolCallEnd { id } => {
                if let Some(call) = self.calls.iter_mut().find(|c| c.id == id) {
                    call.closed = true;
                }
                None
            }
            ProviderEvent::Usage(usage) => {
                self.usage = Some(match self.usage {
                    Some(current) => current.merge(usage),
                    None => usage,
                });
                None
            }
            ProviderEvent::Stop(reason) => {
                self.stop_reason = Some(reason);
                None
            }
            ProviderEvent::Model(model) => {
                self.model = Some(model);
                None
            }
            ProviderEvent::Completed => Some(self.finalize()),
        }
    }

    /// Close out a stream that ended without the provider's completion signal.
    pub fn truncate(&mut self) -> Error {
        let pending = self.calls.iter().filter(|c| !c.closed).count();
        self.state = DecoderState::Terminal;
        let detail = if pending > 0 {
            format!("{pending} tool call(s) still receiving arguments")
        } else {
            "no completion signal from provider".to_string()
        };
        Error::StreamTruncated(detail)
    }

    fn finalize(&mut self) -> StreamEvent {
        self.state = DecoderState::Finalizing;

        let mut tool_calls = Vec::with_capacity(self.calls.len());
        let mut argument_errors = Vec::new();
        for call in self.calls.drain(..) {
            let arguments = match parse_tool_arguments(&call.arguments) {
                Ok(arguments) => {
                    if let Some(schema) = self.schemas.get(&call.name) {
                        if let Err(reason) = schema::validate_arguments(schema, arguments.clone()) {
                            argument_errors.push(MalformedArguments {
                                call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                raw: call.arguments.clone(),
                                reason,
                            });
                        }
                    }
                    arguments
                }
                Err(reason) => {
                    argument_errors.push(MalformedArguments {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        raw: call.arguments.clone(),
                        reason,
                    });
                    Default::default()
                }
            };
            tool_calls.push(ToolCall {
                id: call.id,
                name: call.name,
                arguments,
            });
        }

        let stop_reason = self.stop_reason.unwrap_or(if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });

        let response = Response {
            content: (!self.text.is_empty()).then(|| std::mem::take(&mut self.text)),
            tool_calls,
            stop_reason,
            parsed: None,
            usage: self.usage,
            model: self.model.take(),
            argument_errors,
        };

        self.state = DecoderState::Terminal;
        StreamEvent::Done {
            response: Box::new(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo".into(),
            parameters: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }
    }

    fn done(event: Option<StreamEvent>) -> Response {
        match event {
            Some(StreamEvent::Done { response }) => *response,
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn text_deltas_accumulate() {
        let mut decoder = StreamDecoder::new(&[]);
        assert_eq!(decoder.state(), DecoderState::Idle);

        let first = decoder.push(ProviderEvent::Text("Hello".into()));
        assert_eq!(first, Some(StreamEvent::TextDelta { text: "Hello".into() }));
        assert_eq!(decoder.state(), DecoderState::Receiving);
        decoder.push(ProviderEvent::Text(" world".into()));

        let response = done(decoder.push(ProviderEvent::Completed));
        assert_eq!(response.content.as_deref(), Some("Hello world"));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert!(response.usage.is_none());
        assert!(decoder.is_terminal());
    }

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut decoder = StreamDecoder::new(&[echo_definition()]);
        decoder.push(ProviderEvent::ToolCallStart { id: "a".into(), name: "echo".into() });
        decoder.push(ProviderEvent::ToolCallStart { id: "b".into(), name: "echo".into() });
        for (id, fragment) in [("a", r#"{"te"#), ("b", r#"{"text":"#), ("a", r#"xt":"one"}"#), ("b", r#""two"}"#)] {
            let event = decoder.push(ProviderEvent::ToolCallFragment {
                id: id.into(),
                fragment: fragment.into(),
            });
            assert_eq!(
                event,
                Some(StreamEvent::ToolCallDelta {
                    id: id.into(),
                    name: None,
                    argument_fragment: Some(fragment.into()),
                })
            );
        }
        decoder.push(ProviderEvent::ToolCallEnd { id: "a".into() });
        decoder.push(ProviderEvent::ToolCallEnd { id: "b".into() });
        decoder.push(ProviderEvent::Usage(Usage::new(10, 0)));
        decoder.push(ProviderEvent::Usage(Usage::new(0, 5)));

        let response = done(decoder.push(ProviderEvent::Completed));
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].arguments["text"], "one");
        assert_eq!(response.tool_calls[1].arguments["text"], "two");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage, Some(Usage::new(10, 5)));
        assert!(response.argument_errors.is_empty());
    }

    #[test]
    fn malformed_arguments_surface_on_done() {
        let mut decoder = StreamDecoder::new(&[echo_definition()]);
        decoder.push(ProviderEvent::ToolCallStart { id: "a".into(), name: "echo".into() });
        decoder.push(ProviderEvent::ToolCallFragment { id: "a".into(), fragment: r#"{"text": "#.into() });
        decoder.push(ProviderEvent::ToolCallStart { id: "b".into(), name: "echo".into() });
        decoder.push(ProviderEvent::ToolCallFragment { id: "b".into(), fragment: r#"{"text": 3}"#.into() });

        let response = done(decoder.push(ProviderEvent::Completed));
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.argument_errors.len(), 2);
        assert!(response.argument_error("a").unwrap().reason.contains("invalid JSON"));
        assert!(response.argument_error("b").unwrap().reason.contains("string"));
        assert_eq!(response.argument_error("a").unwrap().raw, r#"{"text": "#);
    }

    #[test]
    fn nothing_after_terminal() {
        let mut decoder = StreamDecoder::new(&[]);
        decoder.push(ProviderEvent::Text("hi".into()));
        assert!(decoder.push(ProviderEvent::Completed).is_some());
        assert!(decoder.push(ProviderEvent::Text("late".into())).is_none());
        assert!(decoder.push(ProviderEvent::Completed).is_none());
    }

    #[test]
    fn truncation_mid_arguments() {
        let mut decoder = StreamDecoder::new(&[]);
        decoder.push(ProviderEvent::ToolCallStart { id: "a".into(), name: "echo".into() });
        decoder.push(ProviderEvent::ToolCallFragment { id: "a".into(), fragment: "{\"te".into() });
        let err = decoder.truncate();
        assert!(matches!(err, Error::StreamTruncated(ref m) if m.contains("1 tool call")));
        assert!(decoder.is_terminal());
        assert!(decoder.push(ProviderEvent::Completed).is_none());
    }

    #[test]
    fn stream_event_wire_shape() {
        let delta = serde_json::to_value(StreamEvent::TextDelta { text: "Hi".into() }).unwrap();
        assert_eq!(delta, json!({"type": "text_delta", "text": "Hi"}));

        let call = serde_json::to_value(StreamEvent::ToolCallDelta {
            id: "c".into(),
            name: Some("read".into()),
            argument_fragment: None,
        })
        .unwrap();
        assert_eq!(call, json!({"type": "tool_call_delta", "id": "c", "name": "read"}));
    }
}
