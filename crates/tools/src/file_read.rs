//! `read`: read a file with line numbers.

use async_trait::async_trait;
use serde_json::{Map, Value};

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::workspace::{Workspace, str_arg, u64_arg};

pub struct ReadTool {
    workspace: Workspace,
}

impl ReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file. Returns numbered lines; use offset and limit to page through large files."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("file_path", ParamType::String).describe("Path of the file to read"),
            ParamSpec::optional("offset", ParamType::Integer)
                .describe("Line to start from (0-based)")
                .with_default(0),
            ParamSpec::optional("limit", ParamType::Integer)
                .describe("Maximum number of lines")
                .with_default(2000),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let file_path = str_arg(&arguments, "file_path")?;
        let offset = u64_arg(&arguments, "offset", 0) as usize;
        let limit = u64_arg(&arguments, "limit", 2000) as usize;

        let path = self.workspace.resolve(file_path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed("read", format!("{}: {e}", path.display())))?;

        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, line)| format!("{:6}\t{line}", i + 1))
            .collect();

        Ok(numbered.join("\n").into())
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
    async fn reads_with_line_numbers_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let tool = ReadTool::new(Workspace::new(dir.path()));

        let all = tool.execute(args(json!({"file_path": "f.txt"}))).await.unwrap();
        assert_eq!(all.as_text(), "     1\tone\n     2\ttwo\n     3\tthree\n     4\tfour");

        let page = tool
            .execute(args(json!({"file_path": "f.txt", "offset": 1, "limit": 2})))
            .await
            .unwrap();
        assert_eq!(page.as_text(), "     2\ttwo\n     3\tthree");
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let tool = ReadTool::new(Workspace::current());
        let err = tool
            .execute(args(json!({"file_path": "/definitely/not/here.txt"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
