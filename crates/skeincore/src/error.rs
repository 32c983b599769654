use thiserror::Error;

/// Umbrella error for engine-facing operations.
#[derive(Error, Debug)]
pub enum SkeinError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("execution capacity reached ({limit} concurrent executions)")]
    CapacityExceeded { limit: usize },

    #[error("unknown execution: {0}")]
    UnknownExecution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural rejection of a workflow document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("edge {edge_id} references missing node {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("cycle detected through node {node_id}")]
    CycleDetected { node_id: String },

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("duplicate edge id: {0}")]
    DuplicateEdgeId(String),

    #[error("input node {0} has incoming edges")]
    InputHasUpstream(String),
}

/// Failure of a single node's dispatch. Fatal to its execution.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("node {node_id} is missing required field '{field}'")]
    MissingData { node_id: String, field: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("sandbox denied: {0}")]
    SandboxDenied(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }
}

/// Model provider failures, classified per the gateway contract.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider {0} is not configured (missing credential)")]
    Unconfigured(String),

    #[error("provider {provider} failed: {message}")]
    Backend { provider: String, message: String },

    #[error("provider {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },
}

/// Persistence failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt {entity} record {id}: {reason}")]
    CorruptRecord {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl StorageError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, SkeinError>;
