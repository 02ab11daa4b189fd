//! The hook pipeline every tool call runs through.
//!
//! ```text
//! before hooks ──Deny──────────────────────────┐
//!      │ Continue                              │
//!      ▼                                       ▼
//! resolve + validate + handler ──▶ ToolResult ──▶ after hooks ──▶ caller
//! ```
//!
//! Nothing escapes the pipeline as an error: resolution failures, invalid
//! arguments, handler errors and panics (in handlers or hooks) all become
//! error-marked results, so one failing call never aborts its siblings. A
//! panicking after-hook leaves the output as it was.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use barebone_core::error::ToolError;
use barebone_core::tool::{ToolCall, ToolOutput, ToolRegistry, ToolResult};

/// What a before-hook decided about a pending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    /// Skip the handler; the reason becomes the tool result.
    Deny(String),
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, call: &ToolCall) -> HookDecision;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    /// Return `Some` to replace the output seen by later hooks and the caller.
    async fn after(&self, call: &ToolCall, result: &ToolResult) -> Option<ToolOutput>;
}

struct BeforeFn<F>(F);

#[async_trait]
impl<F> BeforeHook for BeforeFn<F>
where
    F: Fn(&ToolCall) -> HookDecision + Send + Sync,
{
    async fn before(&self, call: &ToolCall) -> HookDecision {
        (self.0)(call)
    }
}

struct AfterFn<F>(F);

#[async_trait]
impl<F> AfterHook for AfterFn<F>
where
    F: Fn(&ToolCall, &ToolResult) -> Option<ToolOutput> + Send + Sync,
{
    async fn after(&self, call: &ToolCall, result: &ToolResult) -> Option<ToolOutput> {
        (self.0)(call, result)
    }
}

/// Wrap a closure as a before-hook.
pub fn before_fn<F>(f: F) -> Arc<dyn BeforeHook>
where
    F: Fn(&ToolCall) -> HookDecision + Send + Sync + 'static,
{
    Arc::new(BeforeFn(f))
}

/// Wrap a closure as an after-hook.
pub fn after_fn<F>(f: F) -> Arc<dyn AfterHook>
where
    F: Fn(&ToolCall, &ToolResult) -> Option<ToolOutput> + Send + Sync + 'static,
{
    Arc::new(AfterFn(f))
}

/// Ordered before- and after-hooks.
#[derive(Clone, Default)]
pub struct Hooks {
    before: Vec<Arc<dyn BeforeHook>>,
    after: Vec<Arc<dyn AfterHook>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, hook: Arc<dyn BeforeHook>) -> Self {
        self.before.push(hook);
        self
    }

    pub fn with_after(mut self, hook: Arc<dyn AfterHook>) -> Self {
        self.after.push(hook);
        self
    }

    pub fn add_before(&mut self, hook: Arc<dyn BeforeHook>) {
        self.before.push(hook);
    }

    pub fn add_after(&mut self, hook: Arc<dyn AfterHook>) {
        self.after.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Run one call through the pipeline.
    pub async fn run(&self, call: &ToolCall, tools: &ToolRegistry) -> ToolResult {
        let mut result = 'execute: {
            for hook in &self.before {
                match AssertUnwindSafe(hook.before(call)).catch_unwind().await {
                    Ok(HookDecision::Continue) => {}
                    Ok(HookDecision::Deny(reason)) => {
                        debug!(tool = %call.name, call_id = %call.id, reason = %reason, "Tool call denied");
                        break 'execute ToolResult::denied(call, reason);
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(tool = %call.name, panic = %message, "Before-hook panicked");
                        break 'execute ToolResult::error(call, ToolError::Panicked(message));
                    }
                }
            }
            invoke(call, tools).await
        };

        for hook in &self.after {
            match AssertUnwindSafe(hook.after(call, &result)).catch_unwind().await {
                Ok(Some(output)) => result.output = output,
                Ok(None) => {}
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(tool = %call.name, panic = %message, "After-hook panicked, output kept");
                }
            }
        }
        result
    }

    /// Run one call on a private current-thread runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn run_blocking(&self, call: &ToolCall, tools: &ToolRegistry) -> ToolResult {
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(self.run(call, tools)),
            Err(e) => ToolResult::error(call, format!("failed to start runtime: {e}")),
        }
    }
}

async fn invoke(call: &ToolCall, tools: &ToolRegistry) -> ToolResult {
    let def = match tools.resolve(&call.name) {
        Ok(def) => def,
        Err(e) => {
            warn!(tool = %call.name, "Model called an unregistered tool");
            return ToolResult::error(call, e);
        }
    };

    debug!(tool = %call.name, call_id = %call.id, "Invoking tool");
    match AssertUnwindSafe(def.invoke(call.arguments.clone())).catch_unwind().await {
        Ok(Ok(output)) => ToolResult::success(call, output),
        Ok(Err(e)) => {
            warn!(tool = %call.name, error = %e, "Tool execution failed");
            ToolResult::error(call, e)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(tool = %call.name, panic = %message, "Tool panicked");
            ToolResult::error(call, ToolError::Panicked(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
