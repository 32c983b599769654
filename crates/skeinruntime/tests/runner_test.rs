//! End-to-end scheduling scenarios driven through the engine with an
//! in-memory store and a registry extended with test tools.

use async_trait::async_trait;
use skeincore::{
    Config, ExecutionContext, ExecutionEvent, ExecutionStatus, InputData, LoopData, LoopType,
    Node, NodeData, NodeError, NodeStatus, OutputData, ToolData, TransformData, Value, Workflow,
};
use skeinllm::ModelGateway;
use skeinruntime::Engine;
use skeinstore::SqliteStore;
use skeintools::{builtin_registry, Tool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Test tool that sleeps until cancelled.
struct SleepTool {
    secs: u64,
}

#[async_trait]
impl Tool for SleepTool {
    fn id(&self) -> &str {
        "sleep"
    }

    fn name(&self) -> &str {
        "Sleep"
    }

    fn description(&self) -> &str {
        "Sleep for a fixed duration, observing cancellation."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn invoke(&self, _input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(self.secs)) => Ok(Value::Bool(true)),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

async fn engine_with_config(config: Config) -> Engine {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let mut tools = builtin_registry(".");
    tools.register(Arc::new(SleepTool { secs: 30 }));
    let config = Arc::new(config);
    let gateway = Arc::new(ModelGateway::new(config.clone()));
    Engine::new(store, Arc::new(tools), gateway, config)
        .await
        .unwrap()
}

async fn engine() -> Engine {
    engine_with_config(Config::default()).await
}

fn input_node(id: &str) -> Node {
    Node::new(id, id.to_uppercase(), NodeData::Input(InputData::default()))
}

fn output_node(id: &str, label: &str) -> Node {
    Node::new(id, label, NodeData::Output(OutputData::default()))
}

fn transform_node(id: &str, label: &str, expr: &str) -> Node {
    Node::new(
        id,
        label,
        NodeData::Transform(TransformData {
            transform: Some(expr.to_string()),
            extra: Default::default(),
        }),
    )
}

fn tool_node(id: &str, tool_id: &str) -> Node {
    Node::new(
        id,
        id.to_uppercase(),
        NodeData::Tool(ToolData {
            tool_id: Some(tool_id.to_string()),
            tool_config: None,
            extra: Default::default(),
        }),
    )
}

fn loop_node(id: &str, loop_type: LoopType) -> Node {
    Node::new(
        id,
        id.to_uppercase(),
        NodeData::Loop(LoopData {
            loop_type,
            loop_config: Default::default(),
            extra: Default::default(),
        }),
    )
}

/// Drain bus events until they stop arriving.
async fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>,
) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
    {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn node_events(events: &[ExecutionEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeStart { node_id, .. } => {
                Some(("node:start".to_string(), node_id.clone()))
            }
            ExecutionEvent::NodeComplete { node_id, .. } => {
                Some(("node:complete".to_string(), node_id.clone()))
            }
            ExecutionEvent::NodeError { node_id, .. } => {
                Some(("node:error".to_string(), node_id.clone()))
            }
            _ => None,
        })
        .collect()
}

// S1 — linear chain: input -> transform "input * 2" -> output, input 3.
#[tokio::test]
async fn s1_linear_chain() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s1", "linear");
    wf.add_node(input_node("a"));
    wf.add_node(transform_node("b", "Double", "input * 2"));
    wf.add_node(output_node("c", "Out"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    engine.store().create_workflow(&wf).await.unwrap();

    let mut rx = engine.subscribe();
    let started = engine
        .execute_workflow("wf-s1", Value::Number(3.0))
        .await
        .unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);

    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();
    assert_eq!(terminal.status, ExecutionStatus::Completed);
    assert_eq!(terminal.output, Some(Value::Number(6.0)));

    let events = drain(&mut rx).await;
    assert_eq!(
        node_events(&events),
        vec![
            ("node:start".to_string(), "a".to_string()),
            ("node:complete".to_string(), "a".to_string()),
            ("node:start".to_string(), "b".to_string()),
            ("node:complete".to_string(), "b".to_string()),
            ("node:start".to_string(), "c".to_string()),
            ("node:complete".to_string(), "c".to_string()),
        ]
    );
    assert_eq!(events.last().unwrap().name(), "execution:complete");

    // Persistence consistency: stored status matches the last event.
    let persisted = engine.store().get_execution(&started.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, ExecutionStatus::Completed);
    for node in ["a", "b", "c"] {
        assert_eq!(persisted.node_states[node].status, NodeStatus::Completed);
    }
}

// S2 — diamond with fan-in keyed by upstream labels.
#[tokio::test]
async fn s2_diamond_fan_in() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s2", "diamond");
    wf.add_node(input_node("a"));
    wf.add_node(transform_node("b", "left", "input + 1"));
    wf.add_node(transform_node("c", "right", "input * 10"));
    wf.add_node(output_node("d", "Out"));
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "d");
    wf.connect("c", "d");
    engine.store().create_workflow(&wf).await.unwrap();

    let mut rx = engine.subscribe();
    let started = engine
        .execute_workflow("wf-s2", Value::Number(4.0))
        .await
        .unwrap();
    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();

    let expected = Value::Object(BTreeMap::from([
        ("left".to_string(), Value::Number(5.0)),
        ("right".to_string(), Value::Number(40.0)),
    ]));
    assert_eq!(terminal.output, Some(expected));

    // Topological respect: complete(a) precedes start(b) and start(c);
    // both branches complete before start(d). Single start per node.
    let events = node_events(&drain(&mut rx).await);
    let position = |name: &str, node: &str| {
        events
            .iter()
            .position(|(n, id)| n == name && id == node)
            .unwrap_or_else(|| panic!("missing {name} for {node}"))
    };
    assert!(position("node:complete", "a") < position("node:start", "b"));
    assert!(position("node:complete", "a") < position("node:start", "c"));
    assert!(position("node:complete", "b") < position("node:start", "d"));
    assert!(position("node:complete", "c") < position("node:start", "d"));
    for node in ["a", "b", "c", "d"] {
        let starts = events
            .iter()
            .filter(|(n, id)| n == "node:start" && id == node)
            .count();
        assert_eq!(starts, 1, "node {node} should start exactly once");
    }
}

// S3 — cycles are rejected synchronously; no execution record exists.
#[tokio::test]
async fn s3_cycle_rejected() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s3", "cyclic");
    wf.add_node(transform_node("a", "A", "input"));
    wf.add_node(transform_node("b", "B", "input"));
    wf.add_node(transform_node("c", "C", "input"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf.connect("c", "b");
    engine.store().create_workflow(&wf).await.unwrap();

    let result = engine.execute_workflow("wf-s3", Value::Null).await;
    match result {
        Err(skeincore::SkeinError::Validation(
            skeincore::ValidationError::CycleDetected { .. },
        )) => {}
        other => panic!("expected CycleDetected, got {:?}", other.map(|_| ())),
    }
    assert!(engine.store().list_executions(None).await.unwrap().is_empty());
}

// S4 — fail fast: downstream of a failing node never starts.
#[tokio::test]
async fn s4_fail_fast() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s4", "failing");
    wf.add_node(input_node("a"));
    wf.add_node(transform_node("b", "Boom", "nonexistent.field"));
    wf.add_node(output_node("c", "Out"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    engine.store().create_workflow(&wf).await.unwrap();

    let mut rx = engine.subscribe();
    let started = engine.execute_workflow("wf-s4", Value::Null).await.unwrap();
    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();

    assert_eq!(terminal.status, ExecutionStatus::Error);
    let error = terminal.error.unwrap();
    assert!(error.contains("expression"), "unexpected error: {error}");

    let events = node_events(&drain(&mut rx).await);
    assert!(events.iter().any(|(n, id)| n == "node:error" && id == "b"));
    assert!(!events.iter().any(|(_, id)| id == "c"), "c must never start");

    // The unreached node is persisted as skipped; the failing node keeps
    // its error message. The skipped marker lands right after the runner
    // unwinds, so poll briefly.
    let mut persisted = engine.store().get_execution(&started.id).await.unwrap().unwrap();
    for _ in 0..40 {
        if persisted.node_states.get("c").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        persisted = engine.store().get_execution(&started.id).await.unwrap().unwrap();
    }
    assert_eq!(persisted.node_states["c"].status, NodeStatus::Skipped);
    assert_eq!(persisted.node_states["b"].status, NodeStatus::Error);
    assert!(persisted.node_states["b"].error.is_some());
}

// S5 — cooperative cancel across parallel branches with long-running
// tool nodes.
#[tokio::test]
async fn s5_cooperative_cancel() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s5", "parallel-slow");
    wf.add_node(input_node("a"));
    wf.add_node(tool_node("slow1", "sleep"));
    wf.add_node(tool_node("slow2", "sleep"));
    wf.add_node(output_node("d", "Out"));
    wf.connect("a", "slow1");
    wf.connect("a", "slow2");
    wf.connect("slow1", "d");
    wf.connect("slow2", "d");
    engine.store().create_workflow(&wf).await.unwrap();

    let mut rx = engine.subscribe();
    let started = engine.execute_workflow("wf-s5", Value::Null).await.unwrap();

    // Wait until a slow branch has started, then stop.
    loop {
        match rx.recv().await.unwrap() {
            ExecutionEvent::NodeStart { node_id, .. } if node_id.starts_with("slow") => break,
            _ => {}
        }
    }
    let stop_started = std::time::Instant::now();
    engine.stop_execution(&started.id).await.unwrap();

    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();
    assert_eq!(terminal.status, ExecutionStatus::Stopped);
    assert!(
        stop_started.elapsed() < Duration::from_secs(5),
        "cancellation should not wait out the sleeps"
    );

    let events = node_events(&drain(&mut rx).await);
    assert!(
        !events.iter().any(|(n, _)| n == "node:complete"),
        "no in-flight node may complete after stop: {events:?}"
    );
    assert!(
        !events.iter().any(|(_, id)| id == "d"),
        "downstream must not be enqueued after stop"
    );

    // The skipped marker lands right after the runner unwinds; give it a
    // moment.
    let mut skipped = false;
    for _ in 0..40 {
        let persisted = engine.store().get_execution(&started.id).await.unwrap().unwrap();
        if persisted.node_states.get("d").map(|s| s.status) == Some(NodeStatus::Skipped) {
            skipped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(skipped, "unreached downstream node must persist as skipped");
}

// S6 — forEach loop passes the sequence downstream as one value.
#[tokio::test]
async fn s6_foreach_loop() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-s6", "foreach");
    wf.add_node(input_node("a"));
    wf.add_node(loop_node("b", LoopType::ForEach));
    wf.add_node(output_node("c", "Out"));
    wf.connect("a", "b");
    wf.connect("b", "c");
    engine.store().create_workflow(&wf).await.unwrap();

    let input = Value::Array(vec![
        Value::from("x"),
        Value::from("y"),
        Value::from("z"),
    ]);
    let started = engine
        .execute_workflow("wf-s6", input.clone())
        .await
        .unwrap();
    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();
    assert_eq!(terminal.status, ExecutionStatus::Completed);
    assert_eq!(terminal.output, Some(input));
}

// Pure graphs are deterministic: identical inputs, identical outputs.
#[tokio::test]
async fn repeated_runs_are_deterministic() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-det", "pure");
    wf.add_node(input_node("a"));
    wf.add_node(transform_node("b", "left", "input + 1"));
    wf.add_node(transform_node("c", "right", "input * 10"));
    wf.add_node(output_node("d", "Out"));
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "d");
    wf.connect("c", "d");
    engine.store().create_workflow(&wf).await.unwrap();

    let mut rendered = Vec::new();
    for _ in 0..3 {
        let started = engine
            .execute_workflow("wf-det", Value::Number(4.0))
            .await
            .unwrap();
        let terminal = engine.wait_for_terminal(&started.id).await.unwrap();
        rendered.push(serde_json::to_string(&terminal.output).unwrap());
    }
    assert_eq!(rendered[0], rendered[1]);
    assert_eq!(rendered[1], rendered[2]);
}

#[tokio::test]
async fn unknown_workflow_is_rejected() {
    let engine = engine().await;
    match engine.execute_workflow("ghost", Value::Null).await {
        Err(skeincore::SkeinError::UnknownWorkflow(id)) => assert_eq!(id, "ghost"),
        other => panic!("expected UnknownWorkflow, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn concurrency_cap_refuses_excess_executions() {
    let config = Config {
        max_concurrent_executions: 1,
        ..Config::default()
    };
    let engine = engine_with_config(config).await;

    let mut wf = Workflow::new("wf-cap", "slow");
    wf.add_node(input_node("a"));
    wf.add_node(tool_node("slow", "sleep"));
    wf.connect("a", "slow");
    engine.store().create_workflow(&wf).await.unwrap();

    let first = engine.execute_workflow("wf-cap", Value::Null).await.unwrap();
    let second = engine.execute_workflow("wf-cap", Value::Null).await;
    assert!(matches!(
        second,
        Err(skeincore::SkeinError::CapacityExceeded { limit: 1 })
    ));

    engine.stop_execution(&first.id).await.unwrap();
    engine.wait_for_terminal(&first.id).await.unwrap();
}

// Multi-upstream gathering falls back to node ids when labels are empty.
#[tokio::test]
async fn fan_in_label_fallback() {
    let engine = engine().await;
    let mut wf = Workflow::new("wf-fan", "fan");
    wf.add_node(input_node("a"));
    wf.add_node(transform_node("b", "", "input + 1"));
    wf.add_node(transform_node("c", "right", "input * 2"));
    wf.add_node(output_node("d", "Out"));
    wf.connect("a", "b");
    wf.connect("a", "c");
    wf.connect("b", "d");
    wf.connect("c", "d");
    engine.store().create_workflow(&wf).await.unwrap();

    let started = engine
        .execute_workflow("wf-fan", Value::Number(1.0))
        .await
        .unwrap();
    let terminal = engine.wait_for_terminal(&started.id).await.unwrap();
    let output = terminal.output.unwrap();
    let keys: Vec<&String> = output.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["b", "right"]);
}
