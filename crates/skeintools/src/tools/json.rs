use crate::registry::{require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};

/// JSON manipulation tool: parse, stringify, pointer lookup, merge.
pub struct JsonTool;

#[async_trait]
impl Tool for JsonTool {
    fn id(&self) -> &str {
        "json"
    }

    fn name(&self) -> &str {
        "JSON"
    }

    fn description(&self) -> &str {
        "Parse and stringify JSON, look up values by JSON pointer, and \
         merge objects."
    }

    fn category(&self) -> &str {
        "data"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["parse", "stringify", "get", "merge"]
                },
                "input": {},
                "pointer": { "type": "string", "description": "JSON pointer for get" },
                "other": { "type": "object", "description": "Object merged over input" }
            },
            "required": ["operation"]
        })
    }

    async fn invoke(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let operation = require_str(&input, "operation")?;
        let payload = input.get("input").cloned().unwrap_or(Value::Null);

        match operation {
            "parse" => {
                let text = payload.as_str().ok_or_else(|| {
                    NodeError::ExecutionFailed("parse expects a string input".to_string())
                })?;
                serde_json::from_str::<serde_json::Value>(text)
                    .map(Value::from_json)
                    .map_err(|e| NodeError::ExecutionFailed(format!("invalid JSON: {e}")))
            }
            "stringify" => Ok(Value::String(payload.to_json().to_string())),
            "get" => {
                let pointer = require_str(&input, "pointer")?;
                Ok(payload
                    .to_json()
                    .pointer(pointer)
                    .cloned()
                    .map(Value::from_json)
                    .unwrap_or(Value::Null))
            }
            "merge" => {
                let mut base = payload.as_object().cloned().ok_or_else(|| {
                    NodeError::ExecutionFailed("merge expects an object input".to_string())
                })?;
                if let Some(other) = input.get("other").and_then(Value::as_object) {
                    for (key, value) in other {
                        base.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Object(base))
            }
            other => Err(NodeError::ExecutionFailed(format!(
                "unknown json operation: {other}"
            ))),
        }
    }
}
