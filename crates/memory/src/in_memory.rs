//! In-memory backend: useful for testing and ephemeral sessions.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use barebone_core::error::MemoryError;
use barebone_core::memory::{Memory, logged_message};
use barebone_core::message::{Message, Role};

/// Keeps the most recent `capacity` messages; older ones are dropped.
pub struct InMemoryBackend {
    entries: RwLock<VecDeque<(Role, String)>>,
    capacity: usize,
}

impl InMemoryBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Memory for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn log(&self, role: Role, content: &str) -> Result<(), MemoryError> {
        let mut entries = self.entries.write().await;
        entries.push_back((role, content.to_string()));
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }

    async fn get_messages(&self, limit: Option<usize>) -> Result<Vec<Message>, MemoryError> {
        let entries = self.entries.read().await;
        let skip = limit.map_or(0, |l| entries.len().saturating_sub(l));
        Ok(entries
            .iter()
            .skip(skip)
            .map(|(role, content)| logged_message(*role, content.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_and_read_back_in_order() {
        let mem = InMemoryBackend::default();
        mem.log(Role::User, "hi").await.unwrap();
        mem.log(Role::Assistant, "hello").await.unwrap();

        let messages = mem.get_messages(None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].text(), "hello");
    }

    #[tokio::test]
    async fn limit_returns_most_recent() {
        let mem = InMemoryBackend::default();
        for i in 0..5 {
            mem.log(Role::User, &format!("m{i}")).await.unwrap();
        }
        let texts: Vec<_> = mem
            .get_messages(Some(2))
            .await
            .unwrap()
            .iter()
            .map(|m| m.text())
            .collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let mem = InMemoryBackend::new(3);
        for i in 0..5 {
            mem.log(Role::User, &format!("m{i}")).await.unwrap();
        }
        assert_eq!(mem.len().await, 3);
        assert_eq!(mem.get_messages(None).await.unwrap()[0].text(), "m2");
    }

    #[tokio::test]
    async fn clear_empties() {
        let mem = InMemoryBackend::default();
        mem.log(Role::User, "x").await.unwrap();
        mem.clear().await.unwrap();
        assert!(mem.is_empty().await);
    }
}
