//! One-shot helpers for callers that do not need to keep a conversation.
//!
//! Each call builds a throwaway [`Agent`] with default limits.

use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use barebone_core::error::Result;
use barebone_core::provider::{Provider, Response};
use barebone_core::stream::StreamEvent;
use barebone_core::tool::ToolRegistry;

use crate::loop_runner::{Agent, UserInput};

/// Ask once, no tools.
pub async fn complete(provider: Arc<dyn Provider>, input: impl Into<UserInput>) -> Result<Response> {
    Agent::new(provider).run(input).await
}

/// Ask once and stream the answer.
pub fn stream(
    provider: Arc<dyn Provider>,
    input: impl Into<UserInput>,
) -> impl Stream<Item = Result<StreamEvent>> {
    let input = input.into();
    async_stream::stream! {
        let mut agent = Agent::new(provider);
        let mut events = pin!(agent.stream(input));
        while let Some(event) = events.next().await {
            yield event;
        }
    }
}

/// Run one full tool-using turn with the given tools.
pub async fn execute(
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    input: impl Into<UserInput>,
) -> Result<Response> {
    Agent::new(provider).with_tools(tools).run(input).await
}
