use crate::registry::{require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Shell command tool. Spawns with kill-on-drop so cancellation and
/// timeout terminate the child process, not just the await.
pub struct ShellTool {
    workdir: PathBuf,
}

impl ShellTool {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn id(&self) -> &str {
        "shell"
    }

    fn name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command, capturing stdout, stderr, and the exit code."
    }

    fn category(&self) -> &str {
        "system"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout": { "type": "integer", "description": "Seconds (default 120, max 600)" }
            },
            "required": ["command"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let command = require_str(&input, "command")?;
        let timeout_secs = input
            .get("timeout")
            .and_then(Value::as_f64)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        tracing::debug!("shell: {}", &command[..command.len().min(80)]);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to spawn: {e}")))?;

        let output = tokio::select! {
            result = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                child.wait_with_output(),
            ) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(NodeError::ExecutionFailed(format!("command failed: {e}")))
                }
                Err(_) => {
                    return Err(NodeError::Timeout {
                        seconds: timeout_secs,
                    })
                }
            },
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        Ok(Value::Object(BTreeMap::from([
            (
                "stdout".to_string(),
                Value::String(String::from_utf8_lossy(&output.stdout).into_owned()),
            ),
            (
                "stderr".to_string(),
                Value::String(String::from_utf8_lossy(&output.stderr).into_owned()),
            ),
            (
                "exitCode".to_string(),
                Value::Number(output.status.code().unwrap_or(-1) as f64),
            ),
        ])))
    }
}
