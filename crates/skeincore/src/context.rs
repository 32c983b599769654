use crate::{Config, EventEmitter, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context handed to each tool invocation and node dispatch.
///
/// Carries the identity of the surrounding execution, the merged
/// variables-plus-input map, a configuration snapshot taken at execution
/// start, the event emitter routing into the runner's stream, and the
/// cooperative cancellation token.
#[derive(Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    /// Workflow variables merged with the execution input record;
    /// input fields win on collision.
    pub variables: BTreeMap<String, Value>,
    pub config: Arc<Config>,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Re-scope the context to another node of the same execution.
    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.into();
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.events.info(Some(&self.node_id), message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.events.warn(Some(&self.node_id), message);
    }
}
