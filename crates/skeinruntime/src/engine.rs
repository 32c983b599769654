use crate::dispatcher::NodeDispatcher;
use crate::runner::{DagRunner, RunnerHandle};
use crate::validator::validate;
use chrono::Utc;
use skeincore::{
    event_channel, Config, EventBus, EventEmitter, Execution, ExecutionEvent, ExecutionStatus,
    NodeStatus, Result, SkeinError, Value,
};
use skeinllm::ModelGateway;
use skeinstore::{ExecutionPatch, SqliteStore};
use skeintools::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-wide orchestrator: starts executions, tracks active runners,
/// and bridges runner events to persistence and the broadcast sink.
///
/// Collaborators are injected at construction; tests build an engine with
/// an in-memory store and a registry of fakes.
pub struct Engine {
    store: Arc<SqliteStore>,
    dispatcher: Arc<NodeDispatcher>,
    gateway: Arc<ModelGateway>,
    config: Arc<Config>,
    bus: Arc<EventBus>,
    active: Arc<RwLock<HashMap<String, RunnerHandle>>>,
}

impl Engine {
    /// Build the engine and fail any executions a previous process left
    /// behind; running state does not survive a restart.
    pub async fn new(
        store: Arc<SqliteStore>,
        tools: Arc<ToolRegistry>,
        gateway: Arc<ModelGateway>,
        config: Arc<Config>,
    ) -> Result<Self> {
        let recovered = store
            .fail_interrupted_executions("interrupted by restart")
            .await?;
        if recovered > 0 {
            tracing::warn!("marked {recovered} interrupted execution(s) as errors");
        }

        Ok(Self {
            store,
            dispatcher: Arc::new(NodeDispatcher::new(tools, gateway.clone())),
            gateway,
            config,
            bus: Arc::new(EventBus::default()),
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<NodeDispatcher> {
        &self.dispatcher
    }

    /// Subscribe to the execution event stream (at-least-once delivery).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.bus.subscribe()
    }

    /// Start an execution and return its record immediately; the
    /// scheduling loop runs in the background.
    pub async fn execute_workflow(&self, workflow_id: &str, input: Value) -> Result<Execution> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| SkeinError::UnknownWorkflow(workflow_id.to_string()))?;

        validate(&workflow)?;

        {
            let active = self.active.read().await;
            if active.len() >= self.config.max_concurrent_executions {
                return Err(SkeinError::CapacityExceeded {
                    limit: self.config.max_concurrent_executions,
                });
            }
        }

        let execution_id = Uuid::new_v4().to_string();
        let mut execution = Execution::new(&execution_id, workflow_id, input.clone());
        execution.status = ExecutionStatus::Running;
        self.store.create_execution(&execution).await?;

        let (tx, rx) = event_channel();
        let emitter = EventEmitter::new(&execution_id, tx);
        let runner = DagRunner::new(
            Arc::new(workflow),
            &execution_id,
            input,
            self.dispatcher.clone(),
            self.config.clone(),
            emitter,
        );
        let handle = runner.handle();
        self.active
            .write()
            .await
            .insert(execution_id.clone(), handle);

        // Event pump: write through to the store first, then forward to
        // the broadcast sink, so a subscriber observing a terminal event
        // can trust the persisted status.
        let pump = tokio::spawn(pump_events(self.store.clone(), self.bus.clone(), rx));

        let store = self.store.clone();
        let active = self.active.clone();
        let run_id = execution_id.clone();
        tokio::spawn(async move {
            let outcome = runner.run().await;

            for node_id in &outcome.skipped {
                if let Err(e) = store
                    .update_execution_node_state(&run_id, node_id, NodeStatus::Skipped, None, None)
                    .await
                {
                    tracing::warn!(execution_id = %run_id, "failed to persist skipped state: {e}");
                }
            }
            // A user stop has no execution:* event; persist it here.
            if outcome.status == ExecutionStatus::Stopped {
                if let Err(e) = store
                    .update_execution(
                        &run_id,
                        ExecutionPatch {
                            status: Some(ExecutionStatus::Stopped),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::error!(execution_id = %run_id, "failed to persist stop: {e}");
                }
            }

            let _ = pump.await;
            active.write().await.remove(&run_id);
        });

        Ok(execution)
    }

    /// Request cooperative cancellation of a running execution and mark
    /// it stopped in the store.
    pub async fn stop_execution(&self, execution_id: &str) -> Result<()> {
        let handle = {
            let active = self.active.read().await;
            active
                .get(execution_id)
                .cloned()
                .ok_or_else(|| SkeinError::UnknownExecution(execution_id.to_string()))?
        };
        handle.stop();
        self.store
            .update_execution(
                execution_id,
                ExecutionPatch {
                    status: Some(ExecutionStatus::Stopped),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(execution_id, "stop requested");
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Block until the given execution reaches a terminal status and
    /// return its persisted record. Bus events nudge the check; a timer
    /// covers terminal paths with no event (user stop).
    pub async fn wait_for_terminal(&self, execution_id: &str) -> Result<Execution> {
        let mut events = self.subscribe();
        loop {
            if let Some(execution) = self.store.get_execution(execution_id).await? {
                if execution.is_terminal() {
                    return Ok(execution);
                }
            }
            tokio::select! {
                _ = events.recv() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
            }
        }
    }
}

/// Write-through persistence for a single execution's event stream.
/// Storage errors here are logged and suppressed; the in-memory execution
/// continues and the persisted view stays best-effort consistent.
async fn pump_events(
    store: Arc<SqliteStore>,
    bus: Arc<EventBus>,
    mut rx: skeincore::EventReceiver,
) {
    while let Some(event) = rx.recv().await {
        let persisted = match &event {
            ExecutionEvent::NodeStart {
                execution_id,
                node_id,
                ..
            } => {
                store
                    .update_execution_node_state(
                        execution_id,
                        node_id,
                        NodeStatus::Running,
                        None,
                        None,
                    )
                    .await
            }
            ExecutionEvent::NodeComplete {
                execution_id,
                node_id,
                output,
                ..
            } => {
                store
                    .update_execution_node_state(
                        execution_id,
                        node_id,
                        NodeStatus::Completed,
                        Some(output.clone()),
                        None,
                    )
                    .await
            }
            ExecutionEvent::NodeError {
                execution_id,
                node_id,
                error,
                ..
            } => {
                store
                    .update_execution_node_state(
                        execution_id,
                        node_id,
                        NodeStatus::Error,
                        None,
                        Some(error.clone()),
                    )
                    .await
            }
            ExecutionEvent::ExecutionComplete {
                execution_id,
                output,
                ..
            } => {
                store
                    .update_execution(
                        execution_id,
                        ExecutionPatch {
                            status: Some(ExecutionStatus::Completed),
                            output: Some(output.clone()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
            }
            ExecutionEvent::ExecutionError {
                execution_id,
                error,
                ..
            } => {
                store
                    .update_execution(
                        execution_id,
                        ExecutionPatch {
                            status: Some(ExecutionStatus::Error),
                            error: Some(error.clone()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
            }
            ExecutionEvent::Log {
                execution_id,
                level,
                node_id,
                message,
                data,
                ..
            } => {
                store
                    .append_log(
                        execution_id,
                        node_id.as_deref(),
                        *level,
                        message,
                        data.clone(),
                    )
                    .await
            }
        };

        if let Err(e) = persisted {
            tracing::error!(
                event = event.name(),
                execution_id = event.execution_id(),
                "event persistence failed: {e}"
            );
        }

        bus.emit(event);
    }
}
