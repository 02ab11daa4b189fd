//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole loop:
//! caller input → user Message → Provider → assistant Message → tool Messages.

use std::path::Path;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tool::ToolCall;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(Error::Internal(format!("unknown role '{other}'"))),
        }
    }
}

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// A remote `http://` or `https://` URL.
    Url { url: String },
    /// Inline bytes from a `data:image/...;base64,` reference.
    Base64 { media_type: String, data: String },
}

/// An image attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    pub source: ImageSource,
}

impl ImageContent {
    /// Parse an image reference, accepting only recognized schemes.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if let Some(rest) = reference
            .strip_prefix("http://")
            .or_else(|| reference.strip_prefix("https://"))
        {
            if rest.is_empty() || rest.starts_with('/') {
                return Err(Error::InvalidImage(format!("'{reference}' has no host")));
            }
            return Ok(Self {
                source: ImageSource::Url {
                    url: reference.to_string(),
                },
            });
        }

        if let Some(rest) = reference.strip_prefix("data:") {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| Error::InvalidImage("data reference has no payload".into()))?;
            let media_type = header.strip_suffix(";base64").ok_or_else(|| {
                Error::InvalidImage("data reference must be base64-encoded".into())
            })?;
            if !media_type.starts_with("image/") {
                return Err(Error::InvalidImage(format!(
                    "unsupported media type '{media_type}'"
                )));
            }
            if data.is_empty() {
                return Err(Error::InvalidImage("data reference has no payload".into()));
            }
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| Error::InvalidImage(format!("data reference is not valid base64: {e}")))?;
            return Ok(Self {
                source: ImageSource::Base64 {
                    media_type: media_type.to_string(),
                    data: data.to_string(),
                },
            });
        }

        let scheme = reference.split(':').next().unwrap_or_default();
        Err(Error::InvalidImage(format!(
            "unrecognized scheme in '{}' (expected http, https or data)",
            if scheme.is_empty() { reference } else { scheme }
        )))
    }

    /// Read a local image file into an inline reference.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let media_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => {
                return Err(Error::InvalidImage(format!(
                    "cannot infer image type of {}",
                    path.display()
                )));
            }
        };
        let bytes = std::fs::read(path)
            .map_err(|e| Error::InvalidImage(format!("{}: {e}", path.display())))?;
        Ok(Self {
            source: ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        })
    }

    /// The reference as a URL string (`data:` URL for inline images).
    pub fn to_reference(&self) -> String {
        match &self.source {
            ImageSource::Url { url } => url.clone(),
            ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        }
    }
}

/// A typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { image: ImageContent },
}

/// Message content: plain text or an ordered sequence of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Concatenated text of the content, ignoring images.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn images(&self) -> Vec<&ImageContent> {
        match self {
            Content::Text(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Image { image } => Some(image),
                    ContentBlock::Text { .. } => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Text or block content
    pub content: Content,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool results produced by a failing handler
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Content::Text(content.into()))
    }

    /// Create a user message carrying images after its text.
    pub fn user_with_images(text: impl Into<String>, images: Vec<ImageContent>) -> Self {
        if images.is_empty() {
            return Self::user(text);
        }
        let mut blocks = vec![ContentBlock::Text { text: text.into() }];
        blocks.extend(images.into_iter().map(|image| ContentBlock::Image { image }));
        Self::new(Role::User, Content::Blocks(blocks))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::Text(content.into()))
    }

    /// Create an assistant message requesting tool calls.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::new(Role::Assistant, Content::Text(content.unwrap_or_default()));
        message.tool_calls = tool_calls;
        message
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Content::Text(content.into()))
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let mut message = Self::new(Role::Tool, Content::Text(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message.is_error = is_error;
        message
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// An ordered, append-only sequence of messages owned by one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the end of the conversation.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn user_message_with_images_keeps_block_order() {
        let image = ImageContent::parse("https://example.com/cat.png").unwrap();
        let msg = Message::user_with_images("What is this?", vec![image.clone()]);
        match &msg.content {
            Content::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "What is this?"));
                assert!(matches!(&blocks[1], ContentBlock::Image { image: i } if *i == image));
            }
            other => panic!("expected blocks, got {other:?}"),
        }
        assert_eq!(msg.text(), "What is this?");
        assert_eq!(msg.content.images().len(), 1);
    }

    #[test]
    fn image_accepts_data_reference() {
        let image = ImageContent::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(
            image.source,
            ImageSource::Base64 {
                media_type: "image/png".into(),
                data: "iVBORw0KGgo=".into(),
            }
        );
        assert_eq!(image.to_reference(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn image_rejects_unknown_schemes() {
        for bad in [
            "ftp://example.com/a.png",
            "file:///tmp/a.png",
            "cat.png",
            "data:text/plain;base64,aGk=",
            "data:image/png,raw",
            "data:image/png;base64,",
            "data:image/png;base64,not base64!",
            "http://",
            "https:///cat.png",
        ] {
            assert!(
                matches!(ImageContent::parse(bad), Err(Error::InvalidImage(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn image_from_file_encodes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.PNG");
        std::fs::write(&path, b"\x89PNG").unwrap();
        let image = ImageContent::from_file(&path).unwrap();
        assert_eq!(image.to_reference(), "data:image/png;base64,iVBORw==");

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"hi").unwrap();
        assert!(ImageContent::from_file(&txt).is_err());
    }

    #[test]
    fn tool_result_message_references_call() {
        let msg = Message::tool_result("call_1", "Error: boom", true);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.is_error);
    }

    #[test]
    fn conversation_push_and_clear() {
        let mut conv = Conversation::new();
        conv.push(Message::user("First message"));
        conv.push(Message::assistant("Reply"));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().map(|m| m.role), Some(Role::Assistant));

        conv.clear();
        assert!(conv.is_empty());
        assert!(conv.messages().is_empty());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::user("Test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("is_error"));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.text(), "Test message");
        assert_eq!(deserialized.role, Role::User);
    }
}
