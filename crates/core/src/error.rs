//! Error types for the Barebone domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant; the remaining variants
//! are the agent-level failures callers match on.

use std::time::Duration;

use thiserror::Error;

use crate::provider::{MalformedArguments, Response};

/// The top-level error type for all Barebone operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Resolution errors (raised before any network call) ---
    #[error("Cannot resolve provider: {0}")]
    ProviderResolution(String),

    #[error("Unknown built-in tool '{name}' (available: {})", available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid schema for tool '{tool}': {reason}")]
    Schema { tool: String, reason: String },

    #[error("Invalid image reference: {0}")]
    InvalidImage(String),

    // --- Decoding errors ---
    #[error("{0}")]
    MalformedToolArguments(MalformedArguments),

    #[error("Stream truncated before completion: {0}")]
    StreamTruncated(String),

    // --- Loop errors ---
    #[error("Exceeded max_turns ({max_turns}) with tool calls still pending")]
    MaxTurnsExceeded {
        max_turns: u32,
        partial: Box<Response>,
    },

    #[error("Timed out after {}ms while {phase}", after.as_millis())]
    Timeout {
        phase: TimeoutPhase,
        after: Duration,
        partial: Option<Box<Response>>,
    },

    #[error("Structured output does not match schema: {reason}")]
    StructuredOutput {
        reason: String,
        content: Option<String>,
    },

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The best-effort partial response carried by turn-limit and timeout failures.
    pub fn partial_response(&self) -> Option<&Response> {
        match self {
            Error::MaxTurnsExceeded { partial, .. } => Some(partial),
            Error::Timeout { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Which part of a turn a timeout interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting on the provider (request, response, or stream).
    Provider,
    /// Executing the tool calls of a response.
    Tools,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Provider => write!(f, "awaiting the provider"),
            TimeoutPhase::Tools => write!(f, "executing tools"),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn failed(tool_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ToolError::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.to_string(),
        }
    }
}
