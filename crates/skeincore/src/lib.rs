//! Core abstractions for the Skein workflow engine.
//!
//! This crate provides the fundamental types every other component depends
//! on: the dynamic value model, the workflow/execution data model, the
//! execution event stream, the error taxonomy, and process configuration.
//! It has no runtime dependencies beyond serde, chrono, and tokio's
//! channel primitives.

mod config;
mod context;
mod error;
mod events;
mod execution;
mod value;
mod workflow;

pub use config::{Config, ProviderConfig};
pub use context::ExecutionContext;
pub use error::{
    NodeError, ProviderError, Result, SkeinError, StorageError, ValidationError,
};
pub use events::{
    event_channel, EventBus, EventEmitter, EventReceiver, EventSender, ExecutionEvent,
};
pub use execution::{
    Execution, ExecutionStatus, LogLevel, LogLine, NodeState, NodeStatus, MAX_LOG_WINDOW,
};
pub use value::Value;
pub use workflow::{
    AgentData, CodeData, CodeLanguage, ConditionData, Edge, ExtraFields, HttpData, HttpMethod,
    InputData, LoopConfig, LoopData, LoopType, Node, NodeData, NodeKind, OutputData,
    PassthroughData, Position, PromptData, Provider, SensorData, ToolData, TransformData,
    Workflow,
};
