//! `glob` and `grep`: find files by pattern and search their contents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use tracing::trace;

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::workspace::{Workspace, bool_arg, opt_str_arg, str_arg};

const MAX_RESULTS: usize = 100;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__"];

/// Translate a glob (`*`, `**`, `?`, `{a,b}`, `[...]`) into an anchored regex
/// over `/`-separated relative paths.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    let mut in_brace = false;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                in_brace = true;
                out.push_str("(?:");
            }
            '}' if in_brace => {
                in_brace = false;
                out.push(')');
            }
            ',' if in_brace => out.push('|'),
            '[' => {
                let end = chars[i..].iter().position(|&ch| ch == ']').map(|p| p + i);
                match end {
                    Some(end) => {
                        let class: String = chars[i + 1..end].iter().collect();
                        let class = class.strip_prefix('!').map(|rest| format!("^{rest}")).unwrap_or(class);
                        out.push('[');
                        out.push_str(&class);
                        out.push(']');
                        i = end + 1;
                        continue;
                    }
                    None => out.push_str("\\["),
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push('$');
    Regex::new(&out)
}

/// Every file under `base`, as `(relative path with '/', absolute path)`, sorted.
async fn walk(tool: &str, base: &Path) -> Result<Vec<(String, PathBuf)>, ToolError> {
    let mut files = Vec::new();
    let mut stack = vec![base.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir.as_path() == base => {
                return Err(ToolError::failed(tool, format!("{}: {e}", base.display())));
            }
            Err(e) => {
                trace!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                let name = entry.file_name();
                if !SKIPPED_DIRS.iter().any(|s| name.as_os_str() == *s) {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(base) {
                    let rel = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push((rel, path));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

pub struct GlobTool {
    workspace: Workspace,
}

impl GlobTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files whose path matches a glob pattern such as **/*.rs."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("pattern", ParamType::String).describe("Glob pattern, e.g. src/**/*.rs"),
            ParamSpec::optional("path", ParamType::String)
                .describe("Directory to search from")
                .with_default("."),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let pattern = str_arg(&arguments, "pattern")?;
        let base = self.workspace.resolve(opt_str_arg(&arguments, "path").unwrap_or("."));
        let matcher = glob_to_regex(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid glob pattern: {e}")))?;

        let matches: Vec<String> = walk("glob", &base)
            .await?
            .into_iter()
            .filter(|(rel, _)| matcher.is_match(rel))
            .map(|(rel, _)| rel)
            .collect();

        if matches.is_empty() {
            return Ok("No files matched".into());
        }
        let total = matches.len();
        let mut out = matches.into_iter().take(MAX_RESULTS).collect::<Vec<_>>().join("\n");
        if total > MAX_RESULTS {
            out.push_str(&format!("\n... ({} more)", total - MAX_RESULTS));
        }
        Ok(out.into())
    }
}

pub struct GrepTool {
    workspace: Workspace,
}

impl GrepTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns path:line: text for each match."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("pattern", ParamType::String).describe("Regular expression to search for"),
            ParamSpec::optional("path", ParamType::String)
                .describe("Directory to search from")
                .with_default("."),
            ParamSpec::optional("glob", ParamType::String)
                .describe("Only search files matching this glob")
                .with_default("**/*"),
            ParamSpec::optional("case_insensitive", ParamType::Boolean).with_default(false),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let pattern = str_arg(&arguments, "pattern")?;
        let base = self.workspace.resolve(opt_str_arg(&arguments, "path").unwrap_or("."));
        let glob = opt_str_arg(&arguments, "glob").unwrap_or("**/*");

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(bool_arg(&arguments, "case_insensitive"))
            .build()
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex: {e}")))?;
        let file_filter = glob_to_regex(glob)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid glob pattern: {e}")))?;

        let mut hits = Vec::new();
        'files: for (rel, path) in walk("grep", &base).await? {
            if !file_filter.is_match(&rel) {
                continue;
            }
            // Binary and unreadable files are skipped.
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            for (n, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{rel}:{}: {}", n + 1, line.trim_end()));
                    if hits.len() >= MAX_RESULTS {
                        break 'files;
                    }
                }
            }
        }

        if hits.is_empty() {
            return Ok("No matches found".into());
        }
        Ok(hits.join("\n").into())
    }
}
