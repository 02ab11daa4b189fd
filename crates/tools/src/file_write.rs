//! `write` and `edit`: create, overwrite and patch files.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::workspace::{Workspace, str_arg};

pub struct WriteTool {
    workspace: Workspace,
}

impl WriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories and replacing any existing file."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("file_path", ParamType::String).describe("Path of the file to write"),
            ParamSpec::required("content", ParamType::String).describe("The full file content"),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let file_path = str_arg(&arguments, "file_path")?;
        let content = str_arg(&arguments, "content")?;
        let path = self.workspace.resolve(file_path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed("write", format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), bytes = content.len(), "File written");
        Ok(format!("Wrote {} bytes to {}", content.len(), file_path).into())
    }
}

pub struct EditTool {
    workspace: Workspace,
}

impl EditTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_string with new_string in a file."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("file_path", ParamType::String).describe("Path of the file to edit"),
            ParamSpec::required("old_string", ParamType::String)
                .describe("Text to replace; must occur exactly once"),
            ParamSpec::required("new_string", ParamType::String).describe("Replacement text"),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let file_path = str_arg(&arguments, "file_path")?;
        let old = str_arg(&arguments, "old_string")?;
        let new = str_arg(&arguments, "new_string")?;
        let path = self.workspace.resolve(file_path);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed("edit", format!("{}: {e}", path.display())))?;

        match content.matches(old).count() {
            0 => return Err(ToolError::failed("edit", format!("old_string not found in {file_path}"))),
            1 => {}
            n => {
                return Err(ToolError::failed(
                    "edit",
                    format!("old_string occurs {n} times in {file_path}; include more context"),
                ));
            }
        }

        tokio::fs::write(&path, content.replacen(old, new, 1)).await?;
        Ok(format!("Edited {file_path}").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteTool::new(Workspace::new(dir.path()));
        let out = tool
            .execute(args(json!({"file_path": "a/b/c.txt", "content": "hello"})))
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Wrote 5 bytes to a/b/c.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.rs");
        std::fs::write(&file, "let a = 1;\nlet b = 1;\n").unwrap();
        let tool = EditTool::new(Workspace::new(dir.path()));

        let ambiguous = tool
            .execute(args(json!({"file_path": "f.rs", "old_string": "= 1", "new_string": "= 2"})))
            .await
            .unwrap_err();
        assert!(ambiguous.to_string().contains("2 times"));

        let missing = tool
            .execute(args(json!({"file_path": "f.rs", "old_string": "let c", "new_string": "x"})))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("not found"));

        tool.execute(args(json!({"file_path": "f.rs", "old_string": "let b = 1", "new_string": "let b = 2"})))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "let a = 1;\nlet b = 2;\n");
    }
}
