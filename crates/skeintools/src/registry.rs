use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A tool capability: identity, declared schema, and an invoke operation.
///
/// Tools are registered once at process startup; the registry is
/// read-only during execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool id (e.g. "http", "shell").
    fn id(&self) -> &str;

    /// Human-readable display name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> &str {
        "general"
    }

    /// JSON Schema for the invocation input.
    fn input_schema(&self) -> serde_json::Value;

    /// JSON Schema for the result value.
    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": ["object", "array", "string", "number", "boolean", "null"] })
    }

    /// Execute the tool. Long-running tools observe
    /// `ctx.cancellation` and return `NodeError::Cancelled` promptly.
    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError>;
}

/// Catalog of tool capabilities keyed by tool id.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        tracing::debug!("registering tool: {}", id);
        self.tools.insert(id, tool);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// All registered tool ids, sorted for stable listings.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a tool handle, failing with `UnknownTool` when absent.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Tool>, NodeError> {
        self.get(id)
            .ok_or_else(|| NodeError::UnknownTool(id.to_string()))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull a string field out of a tool's input object.
pub(crate) fn input_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Pull a required string field, failing the invocation otherwise.
pub(crate) fn require_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, NodeError> {
    input_str(input, key).ok_or_else(|| NodeError::ExecutionFailed(format!(
        "missing required parameter: {key}"
    )))
}
