use crate::{LogLevel, NodeKind, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Events emitted during workflow execution.
///
/// Delivery to broadcast subscribers is at-least-once; subscribers are
/// expected to be idempotent on (execution id, node id, event name).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename = "node:start")]
    NodeStart {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "node:complete")]
    NodeComplete {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "node:error")]
    NodeError {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "execution:complete")]
    ExecutionComplete {
        #[serde(rename = "executionId")]
        execution_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "execution:error")]
    ExecutionError {
        #[serde(rename = "executionId")]
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "log")]
    Log {
        #[serde(rename = "executionId")]
        execution_id: String,
        level: LogLevel,
        #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Wire name of the event (`node:start`, `log`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::NodeStart { .. } => "node:start",
            ExecutionEvent::NodeComplete { .. } => "node:complete",
            ExecutionEvent::NodeError { .. } => "node:error",
            ExecutionEvent::ExecutionComplete { .. } => "execution:complete",
            ExecutionEvent::ExecutionError { .. } => "execution:error",
            ExecutionEvent::Log { .. } => "log",
        }
    }

    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::NodeStart { execution_id, .. }
            | ExecutionEvent::NodeComplete { execution_id, .. }
            | ExecutionEvent::NodeError { execution_id, .. }
            | ExecutionEvent::ExecutionComplete { execution_id, .. }
            | ExecutionEvent::ExecutionError { execution_id, .. }
            | ExecutionEvent::Log { execution_id, .. } => execution_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::ExecutionComplete { .. } | ExecutionEvent::ExecutionError { .. }
        )
    }
}

/// Reliable per-execution event pipe from a runner to the engine.
pub type EventSender = mpsc::UnboundedSender<ExecutionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle a runner or tool uses to emit into its execution's event stream.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: String,
    sender: EventSender,
}

impl EventEmitter {
    pub fn new(execution_id: impl Into<String>, sender: EventSender) -> Self {
        Self {
            execution_id: execution_id.into(),
            sender,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn log(
        &self,
        level: LogLevel,
        node_id: Option<&str>,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        self.emit(ExecutionEvent::Log {
            execution_id: self.execution_id.clone(),
            level,
            node_id: node_id.map(str::to_string),
            message: message.into(),
            data,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, node_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Info, node_id, message, None);
    }

    pub fn warn(&self, node_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Warn, node_id, message, None);
    }
}

/// Process-wide broadcast bus the engine fans events out on.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
