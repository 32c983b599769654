use chrono::Utc;
use skeincore::{
    Execution, ExecutionStatus, InputData, LogLevel, Node, NodeData, NodeStatus, TransformData,
    Value, Workflow,
};
use skeinstore::{ExecutionPatch, SqliteStore, Template, WorkflowPatch};

fn sample_workflow(id: &str) -> Workflow {
    let mut wf = Workflow::new(id, format!("wf {id}"));
    wf.add_node(Node::new("a", "A", NodeData::Input(InputData::default())));
    wf.add_node(Node::new(
        "b",
        "B",
        NodeData::Transform(TransformData {
            transform: Some("input * 2".to_string()),
            extra: Default::default(),
        }),
    ));
    wf.connect("a", "b");
    wf
}

#[tokio::test]
async fn workflow_crud_round_trip() {
    let store = SqliteStore::in_memory().unwrap();
    let wf = sample_workflow("wf-1");
    store.create_workflow(&wf).await.unwrap();

    let loaded = store.get_workflow("wf-1").await.unwrap().unwrap();
    assert_eq!(loaded, wf);

    let updated = store
        .update_workflow(
            "wf-1",
            WorkflowPatch {
                name: Some("renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert!(updated.updated_at >= wf.updated_at);

    assert!(store.delete_workflow("wf-1").await.unwrap());
    assert!(store.get_workflow("wf-1").await.unwrap().is_none());
}

#[tokio::test]
async fn workflows_list_most_recent_first() {
    let store = SqliteStore::in_memory().unwrap();
    store.create_workflow(&sample_workflow("old")).await.unwrap();
    store.create_workflow(&sample_workflow("new")).await.unwrap();
    // Touching "old" moves it to the front.
    store
        .update_workflow("old", WorkflowPatch::default())
        .await
        .unwrap();

    let names: Vec<String> = store
        .list_workflows()
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.id)
        .collect();
    assert_eq!(names, vec!["old".to_string(), "new".to_string()]);
}

#[tokio::test]
async fn execution_lifecycle_persists() {
    let store = SqliteStore::in_memory().unwrap();
    store.create_workflow(&sample_workflow("wf-1")).await.unwrap();

    let mut exec = Execution::new("e-1", "wf-1", Value::Number(3.0));
    exec.status = ExecutionStatus::Running;
    store.create_execution(&exec).await.unwrap();

    store
        .update_execution_node_state("e-1", "a", NodeStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_execution_node_state("e-1", "a", NodeStatus::Completed, Some(Value::Number(3.0)), None)
        .await
        .unwrap();

    store
        .update_execution(
            "e-1",
            ExecutionPatch {
                status: Some(ExecutionStatus::Completed),
                output: Some(Value::Number(6.0)),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let loaded = store.get_execution("e-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.output, Some(Value::Number(6.0)));
    let state = &loaded.node_states["a"];
    assert_eq!(state.status, NodeStatus::Completed);
    assert_eq!(state.output, Some(Value::Number(3.0)));
    assert!(state.started_at.is_some());
    assert!(state.completed_at.is_some());
}

#[tokio::test]
async fn node_state_transitions_are_monotonic() {
    let store = SqliteStore::in_memory().unwrap();
    let exec = Execution::new("e-1", "wf-1", Value::Null);
    store.create_execution(&exec).await.unwrap();

    store
        .update_execution_node_state("e-1", "n", NodeStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_execution_node_state("e-1", "n", NodeStatus::Completed, Some(Value::Bool(true)), None)
        .await
        .unwrap();
    // Replays and reversals are dropped; output is recorded exactly once.
    store
        .update_execution_node_state("e-1", "n", NodeStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_execution_node_state("e-1", "n", NodeStatus::Completed, Some(Value::Bool(false)), None)
        .await
        .unwrap();

    let loaded = store.get_execution("e-1").await.unwrap().unwrap();
    let state = &loaded.node_states["n"];
    assert_eq!(state.status, NodeStatus::Completed);
    assert_eq!(state.output, Some(Value::Bool(true)));
}

#[tokio::test]
async fn list_executions_filters_by_workflow() {
    let store = SqliteStore::in_memory().unwrap();
    store
        .create_execution(&Execution::new("e-1", "wf-1", Value::Null))
        .await
        .unwrap();
    store
        .create_execution(&Execution::new("e-2", "wf-2", Value::Null))
        .await
        .unwrap();

    let all = store.list_executions(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let one = store.list_executions(Some("wf-2")).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].id, "e-2");
}

#[tokio::test]
async fn logs_append_and_ride_along() {
    let store = SqliteStore::in_memory().unwrap();
    store
        .create_execution(&Execution::new("e-1", "wf-1", Value::Null))
        .await
        .unwrap();

    store
        .append_log("e-1", Some("a"), LogLevel::Info, "starting", None)
        .await
        .unwrap();
    store
        .append_log(
            "e-1",
            Some("a"),
            LogLevel::Error,
            "boom",
            Some(Value::from("detail")),
        )
        .await
        .unwrap();

    let loaded = store.get_execution("e-1").await.unwrap().unwrap();
    assert_eq!(loaded.logs.len(), 2);
    assert_eq!(loaded.logs[0].message, "starting");
    assert_eq!(loaded.logs[1].level, LogLevel::Error);
    assert_eq!(loaded.logs[1].data, Some(Value::from("detail")));
}

#[tokio::test]
async fn interrupted_executions_become_errors() {
    let store = SqliteStore::in_memory().unwrap();
    let mut running = Execution::new("e-1", "wf-1", Value::Null);
    running.status = ExecutionStatus::Running;
    store.create_execution(&running).await.unwrap();

    let mut done = Execution::new("e-2", "wf-1", Value::Null);
    done.status = ExecutionStatus::Completed;
    store.create_execution(&done).await.unwrap();

    let n = store
        .fail_interrupted_executions("interrupted by restart")
        .await
        .unwrap();
    assert_eq!(n, 1);

    let loaded = store.get_execution("e-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Error);
    assert_eq!(loaded.error.as_deref(), Some("interrupted by restart"));
    let untouched = store.get_execution("e-2").await.unwrap().unwrap();
    assert_eq!(untouched.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn templates_round_trip_and_filter() {
    let store = SqliteStore::in_memory().unwrap();
    let template = Template {
        id: "t-1".to_string(),
        name: "Starter".to_string(),
        description: Some("linear chain".to_string()),
        category: "examples".to_string(),
        workflow: sample_workflow("wf-t"),
        created_at: Utc::now(),
    };
    store.save_template(&template).await.unwrap();

    let loaded = store.get_template("t-1").await.unwrap().unwrap();
    assert_eq!(loaded.workflow, template.workflow);

    assert_eq!(
        store.list_templates(Some("examples")).await.unwrap().len(),
        1
    );
    assert!(store.list_templates(Some("other")).await.unwrap().is_empty());
    assert!(store.delete_template("t-1").await.unwrap());
}

#[tokio::test]
async fn survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skein.db");

    {
        let store = SqliteStore::new(&path).unwrap();
        store.create_workflow(&sample_workflow("wf-1")).await.unwrap();
    }

    let store = SqliteStore::new(&path).unwrap();
    let loaded = store.get_workflow("wf-1").await.unwrap();
    assert!(loaded.is_some());
}
