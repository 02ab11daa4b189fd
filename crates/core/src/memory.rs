//! Memory trait: an append/read log of conversation messages.
//!
//! The agent reads the log once when a conversation starts and appends to it
//! after every message it commits. Nothing here promises exactly-once
//! delivery across process restarts.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::{Message, Role};

/// The core Memory trait.
///
/// Implementations: in-memory (bounded), SQLite.
#[async_trait]
pub trait Memory: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Append one message.
    async fn log(&self, role: Role, content: &str) -> std::result::Result<(), MemoryError>;

    /// Logged messages, oldest first. With a limit, only the most recent ones.
    async fn get_messages(&self, limit: Option<usize>) -> std::result::Result<Vec<Message>, MemoryError>;

    /// Forget everything.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}

/// Turn a logged `(role, content)` pair back into a message.
pub fn logged_message(role: Role, content: impl Into<String>) -> Message {
    match role {
        Role::User => Message::user(content),
        Role::Assistant => Message::assistant(content),
        Role::System => Message::system(content),
        Role::Tool => Message::tool_result(String::new(), content, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_message_keeps_role() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            let msg = logged_message(role, "x");
            assert_eq!(msg.role, role);
            assert_eq!(msg.text(), "x");
        }
    }
}
