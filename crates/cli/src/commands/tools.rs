//! `barebone tools`: list the built-in catalog.

use barebone_core::tool::ToolCatalog;
use barebone_tools::BuiltinCatalog;

/// One `name  description` row per built-in tool.
fn rows(catalog: &dyn ToolCatalog) -> Vec<(String, String)> {
    catalog
        .names()
        .into_iter()
        .filter_map(|name| {
            let tool = catalog.lookup(&name)?;
            Some((name, tool.description().to_string()))
        })
        .collect()
}

pub fn run() {
    let rows = rows(&BuiltinCatalog::new());
    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    println!("Built-in tools (enable with --tool NAME or [tools] enabled = [...]):");
    println!();
    for (name, description) in rows {
        let summary = description.lines().next().unwrap_or_default();
        println!("  {name:<width$}  {summary}");
    }
}
