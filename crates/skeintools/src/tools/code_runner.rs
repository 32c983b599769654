use crate::registry::{input_str, require_str, Tool};
use crate::tools::python::{extract_framed, run_framed, FRAME_BEGIN, FRAME_END};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// External code runner: executes user source in a language runtime
/// subprocess with the same framed stdin/stdout protocol as the python
/// tool.
pub struct CodeRunnerTool;

impl CodeRunnerTool {
    fn node_wrapper(code: &str) -> String {
        format!(
            "let data = '';\n\
             process.stdin.on('data', c => data += c);\n\
             process.stdin.on('end', () => {{\n\
               const input = JSON.parse(data);\n\
               let result = null;\n\
               result = (() => {{ {code} }})();\n\
               console.log({FRAME_BEGIN:?});\n\
               console.log(JSON.stringify(result === undefined ? null : result));\n\
               console.log({FRAME_END:?});\n\
             }});\n"
        )
    }

    fn python_wrapper(code: &str) -> String {
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
impl Tool for CodeRunnerTool {
    fn id(&self) -> &str {
        "code-runner"
    }

    fn name(&self) -> &str {
        "Code Runner"
    }

    fn description(&self) -> &str {
        "Run a snippet in an external language runtime (node or python3). \
         The input value is bound to `input`; javascript returns its value, \
         python assigns to `result`."
    }

    fn category(&self) -> &str {
        "code"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "language": { "type": "string", "enum": ["javascript", "python"] },
                "code": { "type": "string" },
                "input": {},
                "timeout": { "type": "integer", "description": "Seconds" }
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let code = require_str(&input, "code")?;
        let language = input_str(&input, "language").unwrap_or("javascript");
        let timeout_secs = input
            .get("timeout")
            .and_then(Value::as_f64)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let stdin_json = input
            .get("input")
            .map(|v| v.to_json().to_string())
            .unwrap_or_else(|| "null".to_string());

        let command = match language {
            "javascript" | "typescript" => {
                let mut command = Command::new("node");
                command.arg("-e").arg(Self::node_wrapper(code));
                command
            }
            "python" => {
                let mut command = Command::new("python3");
                command.arg("-c").arg(Self::python_wrapper(code));
                command
            }
            other => {
                return Err(NodeError::ExecutionFailed(format!(
                    "unsupported language: {other}"
                )))
            }
        };

        let stdout = run_framed(command, stdin_json, timeout_secs, ctx).await?;
        extract_framed(&stdout)
    }
}
