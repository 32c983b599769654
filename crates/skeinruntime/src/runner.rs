use crate::dispatcher::NodeDispatcher;
use chrono::Utc;
use skeincore::{
    Config, EventEmitter, ExecutionContext, ExecutionEvent, ExecutionStatus, LogLevel, NodeError,
    NodeKind, Value, Workflow,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal result of one runner's scheduling loop.
#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Nodes that never started; persisted as `skipped`.
    pub skipped: Vec<String>,
}

/// Handle for cooperative cancellation of a running execution.
#[derive(Clone)]
pub struct RunnerHandle {
    cancellation: CancellationToken,
    stop_requested: Arc<AtomicBool>,
}

impl RunnerHandle {
    /// Request a stop. In-flight work may finish but its output is
    /// discarded, and nothing further is enqueued.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancellation.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// One runner per execution. Owns the workflow snapshot, the output
/// table, adjacency indices, remaining in-degree counters, the ready
/// queue, the cancellation flag, and event emission. All of that mutable
/// state lives on this task; only the dispatch batch is parallel.
pub struct DagRunner {
    workflow: Arc<Workflow>,
    execution_id: String,
    input: Value,
    dispatcher: Arc<NodeDispatcher>,
    config: Arc<Config>,
    events: EventEmitter,
    cancellation: CancellationToken,
    stop_requested: Arc<AtomicBool>,
}

impl DagRunner {
    pub fn new(
        workflow: Arc<Workflow>,
        execution_id: impl Into<String>,
        input: Value,
        dispatcher: Arc<NodeDispatcher>,
        config: Arc<Config>,
        events: EventEmitter,
    ) -> Self {
        Self {
            workflow,
            execution_id: execution_id.into(),
            input,
            dispatcher,
            config,
            events,
            cancellation: CancellationToken::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            cancellation: self.cancellation.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }

    /// Drive the schedule to a terminal outcome.
    pub async fn run(self) -> RunnerOutcome {
        tracing::info!(
            execution_id = %self.execution_id,
            workflow_id = %self.workflow.id,
            "starting execution"
        );

        // Both adjacency indices and the in-degree counters come from one
        // pass over the edges. Upstream lists keep edge order so fan-in
        // collisions resolve to the later insertion.
        let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut upstream: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for node in &self.workflow.nodes {
            indegree.insert(node.id.as_str(), 0);
        }
        for edge in &self.workflow.edges {
            forward
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
            upstream
                .entry(edge.target.as_str())
                .or_default()
                .push(edge.source.as_str());
            *indegree.entry(edge.target.as_str()).or_insert(0) += 1;
        }

        // Ready set seeded in node order with every in-degree-zero node,
        // drained in insertion order.
        let mut ready: VecDeque<&str> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| indegree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();

        let mut outputs: HashMap<&str, Value> = HashMap::new();
        let mut started: HashSet<&str> = HashSet::new();
        let mut failure: Option<NodeError> = None;
        let base_ctx = self.base_context();

        while !ready.is_empty() && !self.cancellation.is_cancelled() {
            let batch: Vec<&str> = ready.drain(..).collect();

            // Dispatch the whole batch concurrently and wait for all of
            // it to settle.
            let mut handles = Vec::with_capacity(batch.len());
            for &node_id in &batch {
                // Stop can land mid-batch; nodes not yet started stay
                // unstarted and settle as skipped.
                if self.cancellation.is_cancelled() {
                    break;
                }
                let node = self
                    .workflow
                    .find_node(node_id)
                    .expect("scheduled node exists in its workflow");
                started.insert(node_id);
                self.events.emit(ExecutionEvent::NodeStart {
                    execution_id: self.execution_id.clone(),
                    node_id: node.id.clone(),
                    kind: node.kind,
                    timestamp: Utc::now(),
                });

                let gathered = self.gather_input(node_id, &upstream, &outputs);
                let dispatcher = self.dispatcher.clone();
                let ctx = base_ctx.for_node(node_id);
                let node = node.clone();
                handles.push(tokio::spawn(async move {
                    let result = dispatcher.dispatch(&node, gathered, &ctx).await;
                    (node.id, result)
                }));
            }

            let settled = futures::future::join_all(handles).await;
            let externally_stopped = self.stop_requested.load(Ordering::SeqCst);

            for joined in settled {
                let (node_id, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!(execution_id = %self.execution_id, "dispatch task panicked: {e}");
                        record_failure(
                            &mut failure,
                            NodeError::ExecutionFailed(format!("dispatch task failed: {e}")),
                        );
                        self.cancellation.cancel();
                        continue;
                    }
                };
                let node_key = self
                    .workflow
                    .find_node(&node_id)
                    .map(|n| n.id.as_str())
                    .expect("settled node exists in its workflow");

                match result {
                    Ok(output) if !externally_stopped => {
                        self.events.emit(ExecutionEvent::NodeComplete {
                            execution_id: self.execution_id.clone(),
                            node_id: node_id.clone(),
                            output: output.clone(),
                            timestamp: Utc::now(),
                        });
                        outputs.insert(node_key, output);
                        for &target in forward.get(node_key).map(Vec::as_slice).unwrap_or(&[]) {
                            let remaining = indegree
                                .get_mut(target)
                                .expect("edge targets were counted during setup");
                            *remaining -= 1;
                            if *remaining == 0 {
                                ready.push_back(target);
                            }
                        }
                    }
                    Ok(_) => {
                        // Finished after an external stop: the output is
                        // discarded and the node's work counts as aborted.
                        self.events.emit(ExecutionEvent::NodeError {
                            execution_id: self.execution_id.clone(),
                            node_id,
                            error: NodeError::Cancelled.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(error) => {
                        self.events.emit(ExecutionEvent::NodeError {
                            execution_id: self.execution_id.clone(),
                            node_id: node_id.clone(),
                            error: error.to_string(),
                            timestamp: Utc::now(),
                        });
                        // Fail fast: no further nodes are enqueued; the
                        // batch already settled.
                        record_failure(&mut failure, error);
                        self.cancellation.cancel();
                    }
                }
            }
        }

        self.finish(outputs, started, failure)
    }

    fn finish(
        &self,
        outputs: HashMap<&str, Value>,
        started: HashSet<&str>,
        failure: Option<NodeError>,
    ) -> RunnerOutcome {
        let skipped: Vec<String> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| !started.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();

        let externally_stopped = self.stop_requested.load(Ordering::SeqCst);
        let user_stop = externally_stopped
            && !matches!(&failure, Some(e) if !e.is_cancelled());

        if user_stop {
            tracing::info!(execution_id = %self.execution_id, "execution stopped by request");
            self.events.log(
                LogLevel::Info,
                None,
                "execution stopped by request",
                None,
            );
            return RunnerOutcome {
                status: ExecutionStatus::Stopped,
                output: None,
                error: None,
                skipped,
            };
        }

        if let Some(error) = failure {
            let message = error.to_string();
            tracing::error!(execution_id = %self.execution_id, "execution failed: {message}");
            self.events.emit(ExecutionEvent::ExecutionError {
                execution_id: self.execution_id.clone(),
                error: message.clone(),
                timestamp: Utc::now(),
            });
            return RunnerOutcome {
                status: ExecutionStatus::Error,
                output: None,
                error: Some(message),
                skipped,
            };
        }

        let output = self.select_result(&outputs);
        tracing::info!(execution_id = %self.execution_id, "execution completed");
        self.events.emit(ExecutionEvent::ExecutionComplete {
            execution_id: self.execution_id.clone(),
            output: output.clone(),
            timestamp: Utc::now(),
        });
        RunnerOutcome {
            status: ExecutionStatus::Completed,
            output: Some(output),
            error: None,
            skipped,
        }
    }

    fn base_context(&self) -> ExecutionContext {
        // Workflow variables merged with the input record; input wins.
        let mut variables: BTreeMap<String, Value> =
            self.workflow.variables.clone().unwrap_or_default();
        if let Some(fields) = self.input.as_object() {
            for (key, value) in fields {
                variables.insert(key.clone(), value.clone());
            }
        }
        ExecutionContext {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow.id.clone(),
            node_id: String::new(),
            variables,
            config: self.config.clone(),
            events: self.events.clone(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Fan-in rules: no upstream ⇒ the execution input; one upstream ⇒
    /// its output verbatim; several ⇒ a mapping keyed by upstream label
    /// (falling back to node id), later insertions winning collisions.
    fn gather_input(
        &self,
        node_id: &str,
        upstream: &HashMap<&str, Vec<&str>>,
        outputs: &HashMap<&str, Value>,
    ) -> Value {
        let sources = upstream.get(node_id).map(Vec::as_slice).unwrap_or(&[]);
        match sources {
            [] => self.input.clone(),
            [single] => outputs.get(single).cloned().unwrap_or(Value::Null),
            many => {
                let mut gathered = BTreeMap::new();
                for &source in many {
                    let label = self
                        .workflow
                        .find_node(source)
                        .map(|n| {
                            if n.label.is_empty() {
                                n.id.clone()
                            } else {
                                n.label.clone()
                            }
                        })
                        .unwrap_or_else(|| source.to_string());
                    let value = outputs.get(source).cloned().unwrap_or(Value::Null);
                    gathered.insert(label, value);
                }
                Value::Object(gathered)
            }
        }
    }

    /// Result selection: the `output`-kind nodes' values, or the terminal
    /// nodes' values when no output node exists. One node yields its
    /// value verbatim; several yield a label-keyed mapping.
    fn select_result(&self, outputs: &HashMap<&str, Value>) -> Value {
        let output_nodes: Vec<_> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Output)
            .collect();

        let chosen: Vec<_> = if output_nodes.is_empty() {
            let has_outgoing: HashSet<&str> = self
                .workflow
                .edges
                .iter()
                .map(|e| e.source.as_str())
                .collect();
            self.workflow
                .nodes
                .iter()
                .filter(|n| !has_outgoing.contains(n.id.as_str()))
                .collect()
        } else {
            output_nodes
        };

        match chosen.as_slice() {
            [] => Value::Null,
            [single] => outputs.get(single.id.as_str()).cloned().unwrap_or(Value::Null),
            many => Value::Object(
                many.iter()
                    .map(|n| {
                        let label = if n.label.is_empty() {
                            n.id.clone()
                        } else {
                            n.label.clone()
                        };
                        let value = outputs.get(n.id.as_str()).cloned().unwrap_or(Value::Null);
                        (label, value)
                    })
                    .collect(),
            ),
        }
    }
}

/// Keep the first captured root cause; a later real error replaces an
/// earlier cancellation so abort noise never masks the trigger.
fn record_failure(slot: &mut Option<NodeError>, error: NodeError) {
    match slot {
        None => *slot = Some(error),
        Some(existing) if existing.is_cancelled() && !error.is_cancelled() => {
            *slot = Some(error)
        }
        Some(_) => {}
    }
}
