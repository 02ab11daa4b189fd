//! # Barebone Core
//!
//! Domain types, traits, and error definitions for the Barebone agent
//! primitives. This crate does **no network I/O**; it defines the model
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here ([`Provider`], [`ProviderAdapter`],
//! [`Memory`], [`Tool`], [`ToolCatalog`]). Implementations live in their
//! respective crates. This enables:
//! - Swapping vendors by configuration
//! - Easy testing with scripted providers and in-memory logs
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod schema;
pub mod stream;
pub mod structured;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, Result, TimeoutPhase, ToolError};
pub use memory::Memory;
pub use message::{Content, ContentBlock, Conversation, ImageContent, ImageSource, Message, Role};
pub use provider::{
    EventReceiver, MalformedArguments, Provider, ProviderAdapter, ProviderRequest, Response,
    StopReason, ToolDefinition, Usage,
};
pub use schema::{ParamSpec, ParamType};
pub use stream::{DecoderState, ProviderEvent, SseEvent, StreamDecoder, StreamEvent, StreamParser};
pub use structured::OutputSchema;
pub use tool::{
    FnHandler, FunctionTool, Tool, ToolCall, ToolCatalog, ToolDef, ToolHandler, ToolOutput,
    ToolRegistry, ToolResult, ToolSource,
};

/// Re-exported so typed tools can derive `JsonSchema` without a direct dependency.
pub use schemars;
