pub mod chat;
pub mod config_cmd;
pub mod detect;
pub mod run;
pub mod tools;

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use barebone_agent::Agent;
use barebone_config::AppConfig;

use crate::AgentOpts;

/// Load the config file (default or given) with environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|name| std::env::var(name).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Fold command-line overrides into the config.
pub fn apply_opts(config: &mut AppConfig, opts: &AgentOpts) {
    if !opts.tools.is_empty() {
        config.tools.enabled = opts.tools.clone();
    }
    if let Some(model) = &opts.model {
        config.model = Some(model.clone());
    }
    if let Some(system) = &opts.system {
        config.system_prompt = Some(system.clone());
    }
    if let Some(max_turns) = opts.max_turns {
        config.agent.max_turns = max_turns;
    }
    if let Some(timeout) = opts.timeout {
        config.agent.timeout_secs = Some(timeout);
    }
}

pub async fn build_agent(path: Option<&Path>, opts: &AgentOpts) -> anyhow::Result<Agent> {
    let mut config = load_config(path)?;
    apply_opts(&mut config, opts);
    config.validate()?;
    debug!(config = ?config, "Effective configuration");

    if !config.has_api_key() {
        anyhow::bail!(
            "no API key configured; set ANTHROPIC_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY, \
             or add `api_key` to {}",
            path.map(Path::to_path_buf)
                .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
                .display()
        );
    }

    Agent::from_config(&config).await.context("failed to set up the agent")
}
