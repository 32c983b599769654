use crate::registry::{input_str, require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use std::path::{Component, Path, PathBuf};

/// Workspace-rooted file operations. Paths escaping the workspace root
/// are refused with a sandbox error.
pub struct FileTool {
    root: PathBuf,
}

impl FileTool {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, NodeError> {
        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            return Err(NodeError::SandboxDenied(format!(
                "absolute path not allowed: {raw}"
            )));
        }
        for component in candidate.components() {
            if matches!(component, Component::ParentDir) {
                return Err(NodeError::SandboxDenied(format!(
                    "path escapes workspace: {raw}"
                )));
            }
        }
        Ok(self.root.join(candidate))
    }
}

#[async_trait]
impl Tool for FileTool {
    fn id(&self) -> &str {
        "file"
    }

    fn name(&self) -> &str {
        "File"
    }

    fn description(&self) -> &str {
        "Read, write, append, list, and delete files inside the workspace."
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list", "exists", "delete"]
                },
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["operation", "path"]
        })
    }

    async fn invoke(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let operation = require_str(&input, "operation")?;
        let path = self.resolve(require_str(&input, "path")?)?;

        let fail = |e: std::io::Error| NodeError::ExecutionFailed(format!("file: {e}"));

        match operation {
            "read" => {
                let content = tokio::fs::read_to_string(&path).await.map_err(fail)?;
                Ok(Value::String(content))
            }
            "write" | "append" => {
                let content = input_str(&input, "content").unwrap_or_default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(fail)?;
                }
                if operation == "append" {
                    use tokio::io::AsyncWriteExt;
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await
                        .map_err(fail)?;
                    file.write_all(content.as_bytes()).await.map_err(fail)?;
                } else {
                    tokio::fs::write(&path, content).await.map_err(fail)?;
                }
                Ok(Value::Bool(true))
            }
            "list" => {
                let mut entries = Vec::new();
                let mut dir = tokio::fs::read_dir(&path).await.map_err(fail)?;
                while let Some(entry) = dir.next_entry().await.map_err(fail)? {
                    entries.push(Value::String(entry.file_name().to_string_lossy().into_owned()));
                }
                entries.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                Ok(Value::Array(entries))
            }
            "exists" => Ok(Value::Bool(path.exists())),
            "delete" => {
                tokio::fs::remove_file(&path).await.map_err(fail)?;
                Ok(Value::Bool(true))
            }
            other => Err(NodeError::ExecutionFailed(format!(
                "unknown file operation: {other}"
            ))),
        }
    }
}
