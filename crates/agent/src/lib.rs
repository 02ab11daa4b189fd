//! The agent loop of Barebone.
//!
//! An [`Agent`] keeps one conversation and drives it turn by turn:
//!
//! 1. **Stage** the user message (text plus validated images)
//! 2. **Ask** the provider, streaming deltas when requested
//! 3. **If tool calls**: run them through the [`Hooks`] pipeline
//!    concurrently, append the results in call order, loop back to 2
//! 4. **If text**: append the answer and return
//!
//! The loop stops with an error after `max_turns` tool phases.

pub mod hooks;
pub mod loop_runner;
pub mod oneshot;

pub use hooks::{AfterHook, BeforeHook, HookDecision, Hooks, after_fn, before_fn};
pub use loop_runner::{Agent, LoopState, PartialResultsPolicy, UserInput};
