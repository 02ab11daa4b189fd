//! `barebone detect`: show how a key resolves.

use barebone_providers::router::resolve_provider;

/// Keep the prefix that decided the provider, hide the rest.
fn mask(key: &str) -> String {
    let visible: String = key.chars().take(7).collect();
    if key.chars().count() <= 7 {
        "*".repeat(key.chars().count())
    } else {
        format!("{visible}...")
    }
}

pub fn run(key: &str, provider: Option<&str>) -> anyhow::Result<()> {
    let kind = resolve_provider(key.trim(), provider)?;
    println!("  Key:       {}", mask(key.trim()));
    println!("  Provider:  {kind}");
    println!("  Model:     {}", kind.default_model());
    println!("  Base URL:  {}", kind.default_base_url());
    Ok(())
}
