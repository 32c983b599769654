//! Built-in tool library.
//!
//! The closed set of ten tool capabilities the dispatcher can reach from
//! `tool` (and `sensor`) nodes, plus the registry that catalogs them.

mod registry;
mod tools;

pub use registry::{Tool, ToolRegistry};
pub use tools::{
    BrowserTool, CodeRunnerTool, FileTool, GithubTool, HttpTool, JsonTool, PythonTool,
    ScraperTool, ShellTool, TextTool,
};

use std::path::Path;
use std::sync::Arc;

/// Register the built-in tool set. File and shell tools are rooted at
/// `workspace_root`.
pub fn register_builtin(registry: &mut ToolRegistry, workspace_root: impl AsRef<Path>) {
    let root = workspace_root.as_ref();
    registry.register(Arc::new(BrowserTool::new()));
    registry.register(Arc::new(ScraperTool::new()));
    registry.register(Arc::new(HttpTool::new()));
    registry.register(Arc::new(FileTool::new(root)));
    registry.register(Arc::new(PythonTool));
    registry.register(Arc::new(CodeRunnerTool));
    registry.register(Arc::new(GithubTool::new()));
    registry.register(Arc::new(ShellTool::new(root)));
    registry.register(Arc::new(JsonTool));
    registry.register(Arc::new(TextTool));
}

/// Registry with every built-in registered, rooted at `workspace_root`.
pub fn builtin_registry(workspace_root: impl AsRef<Path>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry, workspace_root);
    registry
}
