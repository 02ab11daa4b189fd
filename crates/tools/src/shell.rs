//! `bash`: execute a shell command.
//!
//! Runs under `sh -c` (`cmd /C` on Windows) with a timeout; the child is
//! killed when the timeout fires or the call is cancelled.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::workspace::{Workspace, opt_str_arg, str_arg, u64_arg};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct BashTool {
    workspace: Workspace,
}

impl BashTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn command(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its combined stdout and stderr. Use this for running programs, git operations, builds and tests."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("command", ParamType::String).describe("The shell command to execute"),
            ParamSpec::optional("cwd", ParamType::String).describe("Working directory for the command"),
            ParamSpec::optional("timeout", ParamType::Integer)
                .describe("Timeout in seconds")
                .with_default(DEFAULT_TIMEOUT_SECS),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let command = str_arg(&arguments, "command")?;
        let timeout = Duration::from_secs(u64_arg(&arguments, "timeout", DEFAULT_TIMEOUT_SECS));

        let mut cmd = Self::command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match opt_str_arg(&arguments, "cwd") {
            Some(cwd) => {
                cmd.current_dir(self.workspace.resolve(cwd));
            }
            None => {
                if let Some(root) = self.workspace.root() {
                    cmd.current_dir(root);
                }
            }
        }

        debug!(command = %command, "Executing shell command");
        let child = cmd.spawn().map_err(|e| ToolError::failed("bash", e))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| ToolError::failed("bash", e))?,
            Err(_) => {
                warn!(command = %command, ?timeout, "Command timed out");
                return Err(ToolError::failed(
                    "bash",
                    format!("Command timed out after {}s", timeout.as_secs()),
                ));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("Exit code: {code}"));
        }

        let text = text.trim_end().to_string();
        Ok(if text.is_empty() { "(no output)".to_string() } else { text }.into())
    }
}
