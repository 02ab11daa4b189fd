//! SQLite backend.
//!
//! One table, `messages`, in a single database file. Rows are pruned to the
//! configured capacity after every insert, oldest first.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use barebone_core::error::MemoryError;
use barebone_core::memory::{Memory, logged_message};
use barebone_core::message::{Message, Role};

/// A persistent, bounded message log.
pub struct SqliteBackend {
    pool: SqlitePool,
    capacity: usize,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: &Path, capacity: usize) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let backend = Self::from_pool(pool, capacity).await?;
        info!(path = %path.display(), "SQLite memory backend initialized");
        Ok(backend)
    }

    /// An ephemeral database that lives as long as the backend.
    pub async fn in_memory(capacity: usize) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite options: {e}")))?;
        // A second connection would see a different in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;
        Self::from_pool(pool, capacity).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool, capacity: usize) -> Result<Self, MemoryError> {
        let backend = Self {
            pool,
            capacity: capacity.max(1),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn prune(&self) -> Result<(), MemoryError> {
        let removed = sqlx::query(
            "DELETE FROM messages WHERE id NOT IN (SELECT id FROM messages ORDER BY id DESC LIMIT ?)",
        )
        .bind(self.capacity as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("prune: {e}")))?
        .rows_affected();
        if removed > 0 {
            debug!(removed, "Pruned old messages");
        }
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Option<Message>, MemoryError> {
        let role: String = row
            .try_get("role")
            .map_err(|e| MemoryError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| MemoryError::QueryFailed(format!("content column: {e}")))?;
        match Role::from_str(&role) {
            Ok(role) => Ok(Some(logged_message(role, content))),
            Err(_) => {
                warn!(role = %role, "Skipping message with unknown role");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Memory for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn log(&self, role: Role, content: &str) -> Result<(), MemoryError> {
        sqlx::query("INSERT INTO messages (role, content, created_at) VALUES (?, ?, ?)")
            .bind(role.as_str())
            .bind(content)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("insert: {e}")))?;
        self.prune().await
    }

    async fn get_messages(&self, limit: Option<usize>) -> Result<Vec<Message>, MemoryError> {
        // Newest `limit` rows, returned oldest first. SQLite treats -1 as no limit.
        let limit = limit.map_or(-1, |l| l as i64);
        let rows = sqlx::query(
            "SELECT role, content FROM (SELECT id, role, content FROM messages ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("select: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(message) = Self::row_to_message(row)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("clear: {e}")))?;
        Ok(())
    }
}
