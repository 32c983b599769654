use crate::registry::{input_str, require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};

/// String manipulation tool.
pub struct TextTool;

#[async_trait]
impl Tool for TextTool {
    fn id(&self) -> &str {
        "text"
    }

    fn name(&self) -> &str {
        "Text"
    }

    fn description(&self) -> &str {
        "String operations: concat, replace, split, join, case folding, trim."
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
                    "enum": ["concat", "replace", "split", "join", "uppercase", "lowercase", "trim"]
                },
                "input": {},
                "pattern": { "type": "string" },
                "replacement": { "type": "string" },
                "separator": { "type": "string" },
                "suffix": { "type": "string" }
            },
            "required": ["operation"]
        })
    }

    async fn invoke(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let operation = require_str(&input, "operation")?;
        let payload = input.get("input").cloned().unwrap_or(Value::Null);
        let text = payload.render();

        match operation {
            "concat" => {
                let suffix = input_str(&input, "suffix").unwrap_or_default();
                Ok(Value::String(format!("{text}{suffix}")))
            }
            "replace" => {
                let pattern = require_str(&input, "pattern")?;
                let replacement = input_str(&input, "replacement").unwrap_or_default();
                Ok(Value::String(text.replace(pattern, replacement)))
            }
            "split" => {
                let separator = input_str(&input, "separator").unwrap_or(",");
                Ok(Value::Array(
                    text.split(separator)
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
            "join" => {
                let separator = input_str(&input, "separator").unwrap_or(",");
                let parts = payload.as_array().ok_or_else(|| {
                    NodeError::ExecutionFailed("join expects an array input".to_string())
                })?;
                let joined: Vec<String> = parts.iter().map(Value::render).collect();
                Ok(Value::String(joined.join(separator)))
            }
            "uppercase" => Ok(Value::String(text.to_uppercase())),
            "lowercase" => Ok(Value::String(text.to_lowercase())),
            "trim" => Ok(Value::String(text.trim().to_string())),
            other => Err(NodeError::ExecutionFailed(format!(
                "unknown text operation: {other}"
            ))),
        }
    }
}
