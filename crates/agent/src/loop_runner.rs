//! The agent reasoning loop implementation.
//!
//! ```text
//! Idle ──run──▶ AwaitingCompletion ──no tool calls──▶ Idle
//!                   ▲         │
//!                   │     tool calls
//!                   │         ▼
//!                   └── ExecutingTools   (at most `max_turns` times per run)
//! ```
//!
//! The conversation only changes at commit points between awaits, so a
//! failed, timed-out or dropped run never leaves half a turn behind.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use barebone_config::AppConfig;
use barebone_core::error::{Error, Result, TimeoutPhase};
use barebone_core::memory::Memory;
use barebone_core::message::{Conversation, ImageContent, Message, Role};
use barebone_core::provider::{DEFAULT_MAX_TOKENS, Provider, ProviderRequest, Response};
use barebone_core::stream::StreamEvent;
use barebone_core::structured::OutputSchema;
use barebone_core::tool::{ToolCall, ToolDef, ToolRegistry, ToolResult, ToolSource};

use crate::hooks::Hooks;

pub use barebone_config::PartialResultsPolicy;

const EVENT_BUFFER: usize = 64;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingCompletion,
    ExecutingTools,
}

/// One user turn: text, optional image references, optional timeout.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: String,
    /// `http(s)://` URLs or `data:image/...;base64,` references.
    pub images: Vec<String>,
    /// Overrides the agent timeout for this run's provider calls.
    pub timeout: Option<Duration>,
}

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, reference: impl Into<String>) -> Self {
        self.images.push(reference.into());
        self
    }

    pub fn with_images(mut self, references: impl IntoIterator<Item = String>) -> Self {
        self.images.extend(references);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// How the tool phase of a turn ended.
enum ToolPhase {
    Finished(Vec<ToolResult>),
    TimedOut(Vec<Option<ToolResult>>),
}

/// Orchestrates provider calls and tool execution over one conversation.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    hooks: Arc<Hooks>,
    memory: Option<Arc<dyn Memory>>,
    history_limit: Option<usize>,
    memory_loaded: bool,
    system: Option<String>,
    max_turns: u32,
    max_tokens: u32,
    temperature: Option<f32>,
    stop: Vec<String>,
    timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    max_parallel_tools: usize,
    partial_results: PartialResultsPolicy,
    output_schema: Option<OutputSchema>,
    conversation: Conversation,
    state: LoopState,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tools: ToolRegistry::new(),
            hooks: Arc::new(Hooks::new()),
            memory: None,
            history_limit: None,
            memory_loaded: false,
            system: None,
            max_turns: 10,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            stop: Vec::new(),
            timeout: None,
            tool_timeout: None,
            max_parallel_tools: 8,
            partial_results: PartialResultsPolicy::default(),
            output_schema: None,
            conversation: Conversation::new(),
            state: LoopState::Idle,
        }
    }

    /// Build provider, tools, memory and limits from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let provider = barebone_providers::build_from_config(config)?;
        let workspace = match &config.tools.working_dir {
            Some(dir) => barebone_tools::Workspace::new(dir),
            None => barebone_tools::Workspace::current(),
        };
        let tools = barebone_tools::builtin_registry(&config.tools.enabled, workspace)?;
        let memory = barebone_memory::open_from_config(config).await?;

        let settings = &config.agent;
        let mut agent = Self::new(provider)
            .with_tools(tools)
            .with_max_turns(settings.max_turns)
            .with_max_tokens(config.max_tokens)
            .with_max_parallel_tools(settings.max_parallel_tools)
            .with_partial_results(settings.partial_tool_results);
        agent.system = config.system_prompt.clone();
        agent.temperature = config.temperature;
        agent.timeout = settings.timeout_secs.map(Duration::from_secs);
        agent.tool_timeout = settings.tool_timeout_secs.map(Duration::from_secs);
        agent.history_limit = config.memory.history_limit;
        agent.memory = memory;

        info!(
            provider = agent.provider.name(),
            model = agent.provider.model(),
            tools = agent.tools.len(),
            memory = agent.memory.as_ref().map(|m| m.name()).unwrap_or("none"),
            "Agent configured"
        );
        Ok(agent)
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self.memory_loaded = false;
        self
    }

    /// Load at most this many messages from memory.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Maximum ExecutingTools phases per run.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// Bound each provider call (request plus full stream) of every run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the tool phase of each turn.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_max_parallel_tools(mut self, limit: usize) -> Self {
        self.max_parallel_tools = limit.max(1);
        self
    }

    pub fn with_partial_results(mut self, policy: PartialResultsPolicy) -> Self {
        self.partial_results = policy;
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Register a tool; a name already in use is replaced.
    pub fn register_tool(&mut self, source: impl Into<ToolSource>) -> Result<ToolDef> {
        self.tools.register(source)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Reset the conversation. The next run starts like a fresh agent,
    /// including the memory reload.
    pub fn clear_messages(&mut self) {
        self.conversation.clear();
        self.memory_loaded = false;
        debug!("Conversation cleared");
    }

    /// Release the provider's pooled connections.
    pub async fn close(&self) {
        self.provider.close().await;
    }

    /// Run a turn to completion and return the final response.
    pub async fn run(&mut self, input: impl Into<UserInput>) -> Result<Response> {
        self.drive(input.into(), None).await
    }

    /// Run a turn, yielding stream events as they arrive.
    ///
    /// Each provider round ends with its own `Done`; the last `Done` carries
    /// the final response. A failure is yielded last.
    pub fn stream(&mut self, input: impl Into<UserInput>) -> impl Stream<Item = Result<StreamEvent>> + '_ {
        enum Step {
            Event(StreamEvent),
            Finished(Result<Response>),
            Closed,
        }

        let input = input.into();
        async_stream::stream! {
            let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
            let mut drive = pin!(self.drive(input, Some(tx)));
            let mut outcome: Option<Result<Response>> = None;

            loop {
                let step = tokio::select! {
                    result = &mut drive, if outcome.is_none() => Step::Finished(result),
                    event = rx.recv() => match event {
                        Some(event) => Step::Event(event),
                        None => Step::Closed,
                    },
                };
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Finished(result) => outcome = Some(result),
                    Step::Closed => break,
                }
            }

            if outcome.is_none() {
                outcome = Some(drive.await);
            }
            if let Some(Err(e)) = outcome {
                yield Err(e);
            }
        }
    }

    async fn drive(&mut self, input: UserInput, events: Option<mpsc::Sender<StreamEvent>>) -> Result<Response> {
        self.state = LoopState::Idle;
        let user = stage_user(&input)?;
        self.load_memory().await;

        let timeout = input.timeout.or(self.timeout);
        let mut pending_user = Some(user);
        let mut phases = 0u32;
        let mut last_response: Option<Response> = None;

        info!(
            provider = self.provider.name(),
            messages = self.conversation.len(),
            streaming = events.is_some(),
            "Starting run"
        );

        loop {
            self.state = LoopState::AwaitingCompletion;
            debug!(phase = phases, "Awaiting completion");

            let request = self.build_request(pending_user.as_ref());
            let mut streamed = String::new();
            let outcome = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.call_provider(request, events.clone(), &mut streamed))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(after = ?limit, "Provider call timed out");
                            self.state = LoopState::Idle;
                            let partial = if streamed.is_empty() {
                                last_response.take()
                            } else {
                                Some(Response::text(streamed))
                            };
                            return Err(Error::Timeout {
                                phase: TimeoutPhase::Provider,
                                after: limit,
                                partial: partial.map(Box::new),
                            });
                        }
                    }
                }
                None => self.call_provider(request, events.clone(), &mut streamed).await,
            };

            let mut response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    self.state = LoopState::Idle;
                    return Err(e);
                }
            };

            if let Some(schema) = &self.output_schema {
                if let Err(e) = schema.extract(&mut response) {
                    self.state = LoopState::Idle;
                    return Err(e);
                }
            }

            if let Some(tx) = &events {
                let _ = tx
                    .send(StreamEvent::Done {
                        response: Box::new(response.clone()),
                    })
                    .await;
            }

            if !response.has_tool_calls() {
                let text = match (&response.content, &response.parsed) {
                    (Some(text), _) => text.clone(),
                    (None, Some(parsed)) => parsed.to_string(),
                    (None, None) => String::new(),
                };
                let mut turn: Vec<Message> = pending_user.take().into_iter().collect();
                if !text.is_empty() {
                    turn.push(Message::assistant(text));
                }
                self.commit(turn).await;
                self.state = LoopState::Idle;
                debug!(phases, stop_reason = ?response.stop_reason, "Run finished");
                return Ok(response);
            }

            if phases >= self.max_turns {
                warn!(max_turns = self.max_turns, "Max turns reached with tool calls pending");
                self.state = LoopState::Idle;
                return Err(Error::MaxTurnsExceeded {
                    max_turns: self.max_turns,
                    partial: Box::new(response),
                });
            }

            phases += 1;
            self.state = LoopState::ExecutingTools;
            debug!(phase = phases, tool_calls = response.tool_calls.len(), "Executing tools");

            let mut turn: Vec<Message> = pending_user.take().into_iter().collect();
            turn.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            match self.execute_tools(&response).await {
                ToolPhase::Finished(results) => {
                    turn.extend(results.iter().map(ToolResult::to_message));
                    self.commit(turn).await;
                    last_response = Some(response);
                }
                ToolPhase::TimedOut(slots) => {
                    let after = self.tool_timeout.unwrap_or_default();
                    let finished = slots.iter().filter(|s| s.is_some()).count();
                    warn!(after = ?after, finished, total = slots.len(), "Tool phase timed out");

                    if self.partial_results == PartialResultsPolicy::Retain {
                        for (call, slot) in response.tool_calls.iter().zip(slots) {
                            let result = slot.unwrap_or_else(|| {
                                ToolResult::error(call, format!("timed out after {}s", after.as_secs_f64()))
                            });
                            turn.push(result.to_message());
                        }
                        self.commit(turn).await;
                    }
                    self.state = LoopState::Idle;
                    return Err(Error::Timeout {
                        phase: TimeoutPhase::Tools,
                        after,
                        partial: Some(Box::new(response)),
                    });
                }
            }
        }
    }

    fn build_request(&self, pending_user: Option<&Message>) -> ProviderRequest {
        let mut messages = self.conversation.messages().to_vec();
        messages.extend(pending_user.cloned());

        let mut request = ProviderRequest::new(messages).with_tools(self.tools.definitions());
        request.system = self.system.clone();
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request.stop = self.stop.clone();
        request.output_schema = self.output_schema.clone();
        request
    }

    /// One provider round. Streamed deltas are forwarded as they arrive and
    /// their text is mirrored into `streamed`.
    async fn call_provider(
        &self,
        request: ProviderRequest,
        events: Option<mpsc::Sender<StreamEvent>>,
        streamed: &mut String,
    ) -> Result<Response> {
        let Some(tx) = events else {
            return self.provider.complete(request).await;
        };

        let mut rx = self.provider.stream(request).await?;
        while let Some(event) = rx.recv().await {
            match event? {
                StreamEvent::Done { response } => return Ok(*response),
                event => {
                    if let StreamEvent::TextDelta { text } = &event {
                        streamed.push_str(text);
                    }
                    // A dropped consumer does not stop the turn.
                    let _ = tx.send(event).await;
                }
            }
        }
        Err(Error::StreamTruncated("stream ended without a final response".into()))
    }

    async fn execute_tools(&self, response: &Response) -> ToolPhase {
        let calls = &response.tool_calls;
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];

        // Built eagerly so the phase future stays `Send` for any lifetime.
        let this = &*self;
        let calls_in_flight: Vec<_> = calls
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, call)| async move { (index, this.execute_one(&call, response).await) })
            .collect();
        let mut pending = futures::stream::iter(calls_in_flight).buffer_unordered(self.max_parallel_tools);
        let collect = async {
            while let Some((index, result)) = pending.next().await {
                slots[index] = Some(result);
            }
        };

        let timed_out = match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.is_err(),
            None => {
                collect.await;
                false
            }
        };

        if timed_out {
            ToolPhase::TimedOut(slots)
        } else {
            ToolPhase::Finished(slots.into_iter().flatten().collect())
        }
    }

    async fn execute_one(&self, call: &ToolCall, response: &Response) -> ToolResult {
        if let Some(malformed) = response.argument_error(&call.id) {
            warn!(tool = %call.name, call_id = %call.id, reason = %malformed.reason, "Malformed tool arguments");
            return ToolResult::error(call, Error::MalformedToolArguments(malformed.clone()));
        }
        self.hooks.run(call, &self.tools).await
    }

    async fn load_memory(&mut self) {
        if self.memory_loaded {
            return;
        }
        self.memory_loaded = true;
        let Some(memory) = &self.memory else {
            return;
        };
        if !self.conversation.is_empty() {
            return;
        }

        match memory.get_messages(self.history_limit).await {
            Ok(messages) => {
                let history: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                    .collect();
                debug!(count = history.len(), backend = memory.name(), "Loaded history from memory");
                self.conversation.extend(history);
            }
            Err(e) => warn!(error = %e, "Failed to load history from memory"),
        }
    }

    /// Append a turn's messages, then mirror them to memory.
    async fn commit(&mut self, messages: Vec<Message>) {
        self.conversation.extend(messages.iter().cloned());
        let Some(memory) = &self.memory else {
            return;
        };
        for message in &messages {
            let text = message.text();
            if text.is_empty() {
                continue;
            }
            if let Err(e) = memory.log(message.role, &text).await {
                warn!(error = %e, "Failed to write message to memory");
            }
        }
    }
}

/// Build the user message, validating image references before any network call.
fn stage_user(input: &UserInput) -> Result<Message> {
    if input.images.is_empty() {
        return Ok(Message::user(input.text.clone()));
    }
    let images = input
        .images
        .iter()
        .map(|reference| ImageContent::parse(reference))
        .collect::<Result<Vec<_>>>()?;
    Ok(Message::user_with_images(input.text.clone(), images))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use barebone_core::error::ProviderError;
    use barebone_core::provider::EventReceiver;
    use serde_json::json;

    use super::*;

    /// Returns scripted responses in order and records every request.
    struct Scripted {
        responses: Mutex<Vec<Result<Response>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Response>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<Response> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Internal("script exhausted".into())))
        }

        async fn stream(&self, request: ProviderRequest) -> Result<EventReceiver> {
            let response = self.complete(request).await?;
            let (tx, rx) = mpsc::channel(8);
            for event in barebone_core::provider::replay_events(response) {
                tx.send(Ok(event)).await.unwrap();
            }
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Scripted::new(vec![Ok(Response::text("Hello! How can I help?"))]);
        let mut agent = Agent::new(provider.clone()).with_system_prompt("Be nice");

        let response = agent.run("Hello!").await.unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello! How can I help?"));
        assert_eq!(agent.messages().len(), 2);
        assert_eq!(agent.messages()[0].role, Role::User);
        assert_eq!(agent.messages()[1].text(), "Hello! How can I help?");
        assert_eq!(agent.state(), LoopState::Idle);

        let request = &provider.requests.lock().unwrap()[0];
        assert_eq!(request.system.as_deref(), Some("Be nice"));
        assert_eq!(request.messages.len(), 1);
    }

    #[tokio::test]
    async fn provider_error_leaves_conversation_untouched() {
        let provider = Scripted::new(vec![Err(Error::Provider(ProviderError::RateLimited {
            retry_after_secs: 1,
        }))]);
        let mut agent = Agent::new(provider);
        assert!(agent.run("hi").await.is_err());
        assert!(agent.messages().is_empty());
        assert_eq!(agent.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn invalid_image_fails_before_provider() {
        let provider = Scripted::new(vec![]);
        let mut agent = Agent::new(provider.clone());
        let err = agent
            .run(UserInput::new("look").with_image("ftp://example.com/cat.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_skip_the_handler() {
        use barebone_core::provider::MalformedArguments;
        use barebone_core::tool::FunctionTool;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(serde::Deserialize, schemars::JsonSchema)]
        struct Args {
            #[allow(dead_code)]
            n: i64,
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut first = Response::default().with_tool_calls(vec![ToolCall::new("c1", "count", json!({}))]);
        first.argument_errors.push(MalformedArguments {
            call_id: "c1".into(),
            tool_name: "count".into(),
            raw: "{\"n\":".into(),
            reason: "EOF while parsing".into(),
        });
        let provider = Scripted::new(vec![Ok(first), Ok(Response::text("sorry"))]);

        let mut agent = Agent::new(provider);
        agent
            .register_tool(FunctionTool::sync("count", "Count", move |_: Args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("counted")
            }))
            .unwrap();

        agent.run("go").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let tool_msg = &agent.messages()[2];
        assert!(tool_msg.is_error);
        assert!(tool_msg.text().contains("EOF while parsing"));
    }
}
