//! Configuration loading, validation, and credential resolution for Barebone.
//!
//! Loads configuration from `~/.barebone/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables consulted for a credential, highest priority first.
pub const CREDENTIAL_ENV_VARS: &[&str] = &["ANTHROPIC_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"];

/// Provider names accepted by the `provider` setting.
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "openrouter"];

const MEMORY_BACKENDS: &[&str] = &["none", "in_memory", "sqlite"];

/// The root configuration structure.
///
/// Maps directly to `~/.barebone/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key; falls back to the credential environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Explicit provider; inferred from the key prefix when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model id; the provider's default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the provider's base URL (OpenAI-compatible gateways, proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentSettings,

    /// Tool configuration
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_max_tokens() -> u32 {
    8192
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("memory", &self.memory)
            .finish()
    }
}

/// What to do with finished tool results when the tool phase times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialResultsPolicy {
    /// Append nothing from the interrupted turn.
    #[default]
    Discard,
    /// Append the assistant message, the finished results, and error
    /// results for the calls that did not finish.
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum tool-execution phases per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Provider-phase timeout per run, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Timeout for one turn's tool phase, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,

    /// Tool calls executed at once within a turn
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    #[serde(default)]
    pub partial_tool_results: PartialResultsPolicy,
}

fn default_max_turns() -> u32 {
    10
}
fn default_max_parallel_tools() -> usize {
    8
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            timeout_secs: None,
            tool_timeout_secs: None,
            max_parallel_tools: default_max_parallel_tools(),
            partial_tool_results: PartialResultsPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Built-in tools enabled by default (e.g. ["read", "grep"])
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Working directory for `bash`, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "none", "in_memory" or "sqlite"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database path; defaults to `~/.barebone/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Cap for the in-memory backend
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// How many logged messages to load when a conversation starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

fn default_memory_backend() -> String {
    "none".into()
}
fn default_max_messages() -> usize {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            max_messages: default_max_messages(),
            history_limit: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.barebone/config.toml).
    ///
    /// Environment overrides:
    /// - credential: `ANTHROPIC_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    ///   (only when the file sets no key)
    /// - `BAREBONE_PROVIDER`, `BAREBONE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.api_key = resolve_api_key(self.api_key.as_deref(), &lookup);

        if let Some(provider) = lookup("BAREBONE_PROVIDER").filter(|v| !v.is_empty()) {
            self.provider = Some(provider);
        }
        if let Some(model) = lookup("BAREBONE_MODEL").filter(|v| !v.is_empty()) {
            self.model = Some(model);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".barebone")
    }

    /// Where the SQLite memory lives unless configured otherwise.
    pub fn memory_path(&self) -> PathBuf {
        self.memory
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("memory.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError("agent.max_turns must be >= 1".into()));
        }

        if self.agent.max_parallel_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_tools must be >= 1".into(),
            ));
        }

        if let Some(provider) = &self.provider {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown provider '{provider}' (expected one of: {})",
                    KNOWN_PROVIDERS.join(", ")
                )));
            }
        }

        if !MEMORY_BACKENDS.contains(&self.memory.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}' (expected one of: {})",
                self.memory.backend,
                MEMORY_BACKENDS.join(", ")
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: None,
            model: None,
            base_url: None,
            system_prompt: None,
            temperature: None,
            max_tokens: default_max_tokens(),
            agent: AgentSettings::default(),
            tools: ToolsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Pick the credential: an explicit key wins, then the first non-empty
/// variable of [`CREDENTIAL_ENV_VARS`] as seen through `lookup`.
pub fn resolve_api_key(
    explicit: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }
    CREDENTIAL_ENV_VARS
        .iter()
        .find_map(|name| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for barebone_core::Error {
    fn from(err: ConfigError) -> Self {
        barebone_core::Error::Config {
            message: err.to_string(),
        }
    }
}
