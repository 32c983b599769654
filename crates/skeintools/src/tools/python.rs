use crate::registry::{require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Framing markers bracketing the result payload on the child's stdout,
/// so user print statements cannot be mistaken for the result.
pub(crate) const FRAME_BEGIN: &str = "__SKEIN_RESULT_BEGIN__";
pub(crate) const FRAME_END: &str = "__SKEIN_RESULT_END__";

/// Extract and parse the framed result payload from captured stdout.
pub(crate) fn extract_framed(stdout: &str) -> Result<Value, NodeError> {
    let begin = stdout
        .find(FRAME_BEGIN)
        .ok_or_else(|| NodeError::ExecutionFailed("no result frame in output".to_string()))?
        + FRAME_BEGIN.len();
    let end = stdout[begin..]
        .find(FRAME_END)
        .map(|i| begin + i)
        .ok_or_else(|| NodeError::ExecutionFailed("unterminated result frame".to_string()))?;
    let payload = stdout[begin..end].trim();
    serde_json::from_str::<serde_json::Value>(payload)
        .map(Value::from_json)
        .map_err(|e| NodeError::ExecutionFailed(format!("unparseable result payload: {e}")))
}

/// Run a subprocess with JSON piped to stdin, bounded by a timeout and
/// the execution's cancellation token. Returns captured stdout.
pub(crate) async fn run_framed(
    mut command: Command,
    stdin_json: String,
    timeout_secs: u64,
    ctx: &ExecutionContext,
) -> Result<String, NodeError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| NodeError::ExecutionFailed(format!("failed to spawn runner: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(stdin_json.as_bytes())
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to write stdin: {e}")))?;
        drop(stdin);
    }

    let output = tokio::select! {
        result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        ) => match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(NodeError::ExecutionFailed(format!("runner failed: {e}"))),
            Err(_) => return Err(NodeError::Timeout { seconds: timeout_secs }),
        },
        _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(NodeError::ExecutionFailed(format!(
            "runner exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Python code tool: wraps user source so it reads its input as JSON on
/// stdin and emits the `result` binding between framing markers.
pub struct PythonTool;

impl PythonTool {
    fn wrapper(code: &str) -> String {
        format!(
            "import sys, json\n\
             input = json.load(sys.stdin)\n\
             result = None\n\
             {code}\n\
             print({FRAME_BEGIN:?})\n\
             print(json.dumps(result))\n\
             print({FRAME_END:?})\n"
        )
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn id(&self) -> &str {
        "python"
    }

    fn name(&self) -> &str {
        "Python"
    }

    fn description(&self) -> &str {
        "Run Python code in a subprocess. The input value is bound to \
         `input`; assign the outcome to `result`."
    }

    fn category(&self) -> &str {
        "code"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": { "type": "string" },
                "input": {},
                "timeout": { "type": "integer", "description": "Seconds" }
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let code = require_str(&input, "code")?;
        let timeout_secs = input
            .get("timeout")
            .and_then(Value::as_f64)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let stdin_json = input
            .get("input")
            .map(|v| v.to_json().to_string())
            .unwrap_or_else(|| "null".to_string());

        let mut command = Command::new("python3");
        command.arg("-c").arg(Self::wrapper(code));

        let stdout = run_framed(command, stdin_json, timeout_secs, ctx).await?;
        extract_framed(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_payload_extracts() {
        let stdout = format!(
            "user noise\n{}\n{{\"ok\": true}}\n{}\ntrailing",
            FRAME_BEGIN, FRAME_END
        );
        let value = extract_framed(&stdout).unwrap();
        assert_eq!(value.get("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn missing_frame_is_an_error() {
        assert!(extract_framed("no markers here").is_err());
    }
}
