//! Barebone CLI, the main entry point.
//!
//! Commands:
//! - `run`     Send one prompt (optionally streamed)
//! - `chat`    Interactive conversation
//! - `tools`   List the built-in tool catalog
//! - `detect`  Show which provider a key resolves to
//! - `config`  Show, locate or initialize the config file

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "barebone", about = "Barebone, a minimal tool-using LLM agent", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.barebone/config.toml
    #[arg(long, global = true, env = "BAREBONE_CONFIG")]
    config: Option<PathBuf>,
}

/// Overrides shared by `run` and `chat`.
#[derive(Args, Debug, Clone, Default)]
pub struct AgentOpts {
    /// Enable a built-in tool (repeatable); replaces the configured set
    #[arg(long = "tool", value_name = "NAME")]
    pub tools: Vec<String>,

    /// Model id
    #[arg(long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Maximum tool phases per prompt
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Provider timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single prompt
    Run {
        prompt: String,

        /// Print text as it arrives
        #[arg(long)]
        stream: bool,

        /// Attach an image (URL, data URI or file path; repeatable)
        #[arg(long = "image", value_name = "REF")]
        images: Vec<String>,

        #[command(flatten)]
        opts: AgentOpts,
    },

    /// Chat interactively
    Chat {
        #[command(flatten)]
        opts: AgentOpts,
    },

    /// List built-in tools
    Tools,

    /// Show the provider an API key resolves to
    Detect {
        key: String,

        /// Explicit provider name
        #[arg(long)]
        provider: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            prompt,
            stream,
            images,
            opts,
        } => commands::run::run(config_path, &opts, prompt, images, stream).await?,
        Commands::Chat { opts } => commands::chat::run(config_path, &opts).await?,
        Commands::Tools => commands::tools::run(),
        Commands::Detect { key, provider } => commands::detect::run(&key, provider.as_deref())?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "barebone",
            "run",
            "what is here?",
            "--stream",
            "--tool",
            "read",
            "--tool",
            "glob",
            "--image",
            "https://example.com/a.png",
            "--max-turns",
            "3",
            "--timeout",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                prompt,
                stream,
                images,
                opts,
            } => {
                assert_eq!(prompt, "what is here?");
                assert!(stream);
                assert_eq!(images, vec!["https://example.com/a.png"]);
                assert_eq!(opts.tools, vec!["read", "glob"]);
                assert_eq!(opts.max_turns, Some(3));
                assert_eq!(opts.timeout, Some(30));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["barebone", "tools", "-v", "--config", "/tmp/b.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/b.toml")));
    }

    #[test]
    fn detect_requires_a_key() {
        assert!(Cli::try_parse_from(["barebone", "detect"]).is_err());
    }
}
