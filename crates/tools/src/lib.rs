//! Built-in tool implementations for Barebone.
//!
//! Tools give the agent the ability to interact with the world: read, write
//! and edit files, find files and search their contents, run shell
//! commands, fetch pages, search the web, and make HTTP requests.
//!
//! [`BuiltinCatalog`] exposes them by name so a registry can resolve
//! `ToolSource::Builtin("bash")`.

pub mod file_read;
pub mod file_search;
pub mod file_write;
pub mod http_request;
pub mod shell;
pub mod web_fetch;
pub mod web_search;
pub mod workspace;

use std::sync::Arc;

use barebone_core::error::Result;
use barebone_core::tool::{Tool, ToolCatalog, ToolRegistry};

pub use workspace::Workspace;

/// Built-in tool names, in catalog order.
pub const BUILTIN_NAMES: &[&str] = &[
    "read",
    "write",
    "edit",
    "bash",
    "glob",
    "grep",
    "web_fetch",
    "web_search",
    "http_request",
];

/// The fixed catalog of built-in tools. Lookups are case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct BuiltinCatalog {
    workspace: Workspace,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths (and run commands) under `workspace`.
    pub fn with_workspace(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

impl ToolCatalog for BuiltinCatalog {
    fn names(&self) -> Vec<String> {
        BUILTIN_NAMES.iter().map(|n| n.to_string()).collect()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let ws = self.workspace.clone();
        let tool: Arc<dyn Tool> = match name {
            "read" => Arc::new(file_read::ReadTool::new(ws)),
            "write" => Arc::new(file_write::WriteTool::new(ws)),
            "edit" => Arc::new(file_write::EditTool::new(ws)),
            "bash" => Arc::new(shell::BashTool::new(ws)),
            "glob" => Arc::new(file_search::GlobTool::new(ws)),
            "grep" => Arc::new(file_search::GrepTool::new(ws)),
            "web_fetch" => Arc::new(web_fetch::WebFetchTool),
            "web_search" => Arc::new(web_search::WebSearchTool),
            "http_request" => Arc::new(http_request::HttpRequestTool),
            _ => return None,
        };
        Some(tool)
    }
}

/// A registry that resolves built-in names, with `names` already registered.
pub fn builtin_registry(names: &[String], workspace: Workspace) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::with_catalog(Arc::new(BuiltinCatalog::with_workspace(workspace)));
    for name in names {
        registry.register(name.as_str())?;
    }
    Ok(registry)
}
