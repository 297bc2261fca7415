//! Shell tool confined to a workspace directory.
//!
//! Commands run through `sh -c` with a cleared environment, inside the
//! workspace, under a wall-clock timeout. The tool itself only enforces the
//! working directory; command screening (network clients, paths that leave
//! the workspace) belongs to
//! [`ShellSandboxHook`](delve_core::hooks::ShellSandboxHook), which runs
//! before the call and pins `cwd` and `timeout_secs`.

use async_trait::async_trait;
use delve_core::message::truncate_utf8;
use delve_core::tool::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Default timeout for command execution (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum timeout allowed (5 minutes).
const MAX_TIMEOUT_SECS: u64 = 300;

/// Maximum bytes kept per output stream.
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// `PATH` given to every command; nothing else is inherited.
const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Shell tool for running commands inside a workspace.
///
/// Non-zero exit codes are not errors: the output and exit code are returned
/// to the model so it can see what happened.
///
/// # Example
///
/// ```no_run
/// use delve_shell::Shell;
/// use delve_core::tool::{Tool, ToolContext, ToolRegistry};
/// use delve_core::VirtualFs;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let shell = Shell::new("/tmp/research");
/// let ctx = ToolContext::new("run-1", Arc::new(ToolRegistry::new()), Arc::new(VirtualFs::new()));
/// let result = shell.execute(json!({"command": "ls"}), &ctx).await?;
/// println!("{}", result.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Shell {
    workspace: PathBuf,
}

impl Shell {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve the requested working directory, refusing anything outside
    /// the workspace.
    fn working_dir(&self, requested: Option<&str>) -> Result<PathBuf, ToolError> {
        let Some(dir) = requested else {
            return Ok(self.workspace.clone());
        };
        let path = Path::new(dir);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        };
        if path.components().any(|c| c == Component::ParentDir) || !path.starts_with(&self.workspace)
        {
            return Err(ToolError::PolicyViolation(format!(
                "Working directory '{}' is outside the workspace {}",
                dir,
                self.workspace.display()
            )));
        }
        if !path.is_dir() {
            return Err(ToolError::NotFound(format!(
                "Working directory does not exist: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

fn capture(bytes: &[u8]) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX_OUTPUT_SIZE {
        (truncate_utf8(&text, MAX_OUTPUT_SIZE).to_string(), true)
    } else {
        (text.into_owned(), false)
    }
}

#[async_trait]
impl Tool for Shell {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command inside the research workspace and return its output. \
         Captures stdout and stderr. Network access and paths outside the workspace \
         are not available. Commands time out (default 30s, max 5m)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory inside the workspace"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)"
                },
                "sandboxed": {
                    "type": "boolean",
                    "description": "Set by the sandbox policy; ignored when sent by the model"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("Missing 'command' field".into()))?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidInput("Command cannot be empty".into()));
        }

        let cwd = self.working_dir(input.get("cwd").and_then(Value::as_str))?;
        let timeout_secs = input
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);
        let sandboxed = input
            .get("sandboxed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        log::debug!(
            "Running shell command in {} (timeout {}s, sandboxed {}): {}",
            cwd.display(),
            timeout_secs,
            sandboxed,
            command
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .env_clear()
            .env("PATH", SAFE_PATH)
            .env("HOME", &self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to start command: {}", e)))?;

        let output = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled),
            output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()) => {
                output
                    .map_err(|_| ToolError::Timeout(timeout_secs * 1000))?
                    .map_err(|e| ToolError::ExecutionFailed(format!("Failed to run command: {}", e)))?
            }
        };

        let (stdout, stdout_truncated) = capture(&output.stdout);
        let (stderr, stderr_truncated) = capture(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        #[cfg(unix)]
        let signal = output.status.signal();
        #[cfg(not(unix))]
        let signal: Option<i32> = None;

        let mut content = stdout;
        if stdout_truncated {
            content.push_str("\n... (stdout truncated)");
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str("[stderr]\n");
            content.push_str(&stderr);
            if stderr_truncated {
                content.push_str("\n... (stderr truncated)");
            }
        }
        if content.is_empty() {
            content = format!("Command completed with exit code {}", exit_code);
        }

        Ok(ToolResult::with_metadata(
            content,
            json!({
                "exit_code": exit_code,
                "success": output.status.success(),
                "signal": signal,
                "cwd": cwd.display().to_string(),
                "stdout_truncated": stdout_truncated,
                "stderr_truncated": stderr_truncated,
                "timeout_secs": timeout_secs,
                "sandboxed": sandboxed,
            }),
        ))
    }
}
