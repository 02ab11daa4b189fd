//! `barebone config`: configuration management commands.

use std::path::{Path, PathBuf};

use barebone_config::AppConfig;

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Print the effective configuration. The key is never printed.
pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = super::load_config(path)?;
    let has_key = config.has_api_key();
    config.api_key = None;

    println!("# {}", config_file(path).display());
    println!("# api key: {}", if has_key { "set" } else { "not set" });
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_file(path).display());
}

/// Write the default config, refusing to clobber an existing file.
pub fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let target = config_file(path);
    write_default(&target, force)?;
    println!("Wrote {}", target.display());
    Ok(())
}

fn write_default(target: &Path, force: bool) -> anyhow::Result<()> {
    if target.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", target.display());
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, AppConfig::default_toml())?;
    Ok(())
}
