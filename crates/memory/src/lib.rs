//! Conversation memory backends for Barebone.
//!
//! Both backends implement [`barebone_core::Memory`]. [`open_from_config`]
//! picks one from the `[memory]` section of the config file.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::debug;

use barebone_config::AppConfig;
use barebone_core::Memory;
use barebone_core::error::MemoryError;

pub use in_memory::InMemoryBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Open the configured backend; `None` when memory is disabled.
pub async fn open_from_config(config: &AppConfig) -> Result<Option<Arc<dyn Memory>>, MemoryError> {
    let settings = &config.memory;
    debug!(backend = %settings.backend, "Opening memory backend");
    match settings.backend.as_str() {
        "none" => Ok(None),
        "in_memory" => Ok(Some(Arc::new(InMemoryBackend::new(settings.max_messages)))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let backend = SqliteBackend::open(&config.memory_path(), settings.max_messages).await?;
            Ok(Some(Arc::new(backend)))
        }
        other => Err(MemoryError::Storage(format!("memory backend '{other}' is not available"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backend_selection() {
        let mut config = AppConfig::default();
        assert!(open_from_config(&config).await.unwrap().is_none());

        config.memory.backend = "in_memory".into();
        let mem = open_from_config(&config).await.unwrap().unwrap();
        assert_eq!(mem.name(), "in_memory");

        config.memory.backend = "redis".into();
        assert!(open_from_config(&config).await.is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_from_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.memory.backend = "sqlite".into();
        config.memory.path = Some(dir.path().join("m.db").display().to_string());

        let mem = open_from_config(&config).await.unwrap().unwrap();
        assert_eq!(mem.name(), "sqlite");
        assert!(dir.path().join("m.db").exists());
    }
}
