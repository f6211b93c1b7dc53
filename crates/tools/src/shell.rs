//! Shell tool: execute system commands.
//!
//! Supports command allowlisting, a per-command timeout, and line-by-line
//! progress streaming while the command runs.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use windlass_core::{ProgressSink, Tool, ToolError};

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    /// If non-empty, only these base commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            allowed_commands,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true; // No allowlist = all commands allowed
        }
        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    async fn run(&self, command: &str, progress: &ProgressSink) -> Result<String, ToolError> {
        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: "failed to capture stderr".into(),
        })?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();

        let work = async {
            let mut out_done = false;
            let mut err_done = false;
            while !(out_done && err_done) {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line {
                        Ok(Some(line)) => {
                            progress.send(&line);
                            stdout_buf.push_str(&line);
                            stdout_buf.push('\n');
                        }
                        _ => out_done = true,
                    },
                    line = err_lines.next_line(), if !err_done => match line {
                        Ok(Some(line)) => {
                            progress.send(&line);
                            stderr_buf.push_str(&line);
                            stderr_buf.push('\n');
                        }
                        _ => err_done = true,
                    },
                }
            }
            child.wait().await
        };

        // kill_on_drop reaps the child if the timeout fires.
        let status = match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "shell".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: "shell".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let result_text = if status.success() {
            if stderr_buf.is_empty() {
                stdout_buf
            } else {
                format!("{stdout_buf}\n[stderr]: {stderr_buf}")
            }
        } else {
            let code = status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout_buf}\n{stderr_buf}")
        };
        Ok(result_text.trim().to_string())
    }
}

fn shell_command(command: &str) -> Command {
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

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout/stderr. Use this for running programs, checking files, git operations, etc."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        progress: &ProgressSink,
    ) -> Result<String, ToolError> {
        let command = input["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "shell".into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        debug!(command = %command, "Executing shell command");
        self.run(command, progress).await
    }
}
