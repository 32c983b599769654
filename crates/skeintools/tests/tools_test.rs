use skeincore::{event_channel, Config, EventEmitter, ExecutionContext, NodeError, Value};
use skeintools::{builtin_registry, FileTool, JsonTool, ShellTool, TextTool, Tool};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn test_ctx() -> ExecutionContext {
    // Emits are fire-and-forget; the dropped receiver is harmless here.
    let (tx, _rx) = event_channel();
    ExecutionContext {
        execution_id: "e-test".to_string(),
        workflow_id: "wf-test".to_string(),
        node_id: "n".to_string(),
        variables: BTreeMap::new(),
        config: Arc::new(Config::default()),
        events: EventEmitter::new("e-test", tx),
        cancellation: CancellationToken::new(),
    }
}

fn obj(pairs: Vec<(&str, Value)>) -> Value {
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

#[test]
fn builtin_registry_has_the_closed_set() {
    let registry = builtin_registry(".");
    assert_eq!(
        registry.list_ids(),
        vec![
            "browser",
            "code-runner",
            "file",
            "github",
            "http",
            "json",
            "python",
            "scraper",
            "shell",
            "text"
        ]
    );
    assert!(registry.get("nope").is_none());
}

#[tokio::test]
async fn shell_captures_output_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let tool = ShellTool::new(dir.path());
    let result = tool
        .invoke(
            obj(vec![("command", Value::from("printf hello; exit 3"))]),
            &test_ctx(),
        )
        .await
        .unwrap();
    assert_eq!(result.get("stdout"), Some(&Value::from("hello")));
    assert_eq!(result.get("exitCode"), Some(&Value::Number(3.0)));
}

#[tokio::test]
async fn shell_respects_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let tool = ShellTool::new(dir.path());
    let ctx = test_ctx();
    ctx.cancellation.cancel();
    let result = tool
        .invoke(obj(vec![("command", Value::from("sleep 30"))]), &ctx)
        .await;
    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[tokio::test]
async fn file_round_trip_inside_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let tool = FileTool::new(dir.path());
    let ctx = test_ctx();

    tool.invoke(
        obj(vec![
            ("operation", Value::from("write")),
            ("path", Value::from("notes/a.txt")),
            ("content", Value::from("first")),
        ]),
        &ctx,
    )
    .await
    .unwrap();

    tool.invoke(
        obj(vec![
            ("operation", Value::from("append")),
            ("path", Value::from("notes/a.txt")),
            ("content", Value::from(" second")),
        ]),
        &ctx,
    )
    .await
    .unwrap();

    let content = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("read")),
                ("path", Value::from("notes/a.txt")),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(content, Value::from("first second"));

    let listing = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("list")),
                ("path", Value::from("notes")),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(listing, Value::Array(vec![Value::from("a.txt")]));
}

#[tokio::test]
async fn file_refuses_workspace_escape() {
    let dir = tempfile::tempdir().unwrap();
    let tool = FileTool::new(dir.path());
    let ctx = test_ctx();

    for path in ["../outside.txt", "/etc/passwd"] {
        let result = tool
            .invoke(
                obj(vec![
                    ("operation", Value::from("read")),
                    ("path", Value::from(path)),
                ]),
                &ctx,
            )
            .await;
        assert!(
            matches!(result, Err(NodeError::SandboxDenied(_))),
            "path {path} should be denied"
        );
    }
}

#[tokio::test]
async fn json_pointer_and_merge() {
    let tool = JsonTool;
    let ctx = test_ctx();

    let got = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("get")),
                ("input", obj(vec![("a", obj(vec![("b", Value::Number(7.0))]))])),
                ("pointer", Value::from("/a/b")),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(got, Value::Number(7.0));

    let merged = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("merge")),
                ("input", obj(vec![("x", Value::Number(1.0))])),
                ("other", obj(vec![("y", Value::Number(2.0))])),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(merged.get("x"), Some(&Value::Number(1.0)));
    assert_eq!(merged.get("y"), Some(&Value::Number(2.0)));
}

#[tokio::test]
async fn text_operations() {
    let tool = TextTool;
    let ctx = test_ctx();

    let split = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("split")),
                ("input", Value::from("a,b,c")),
                ("separator", Value::from(",")),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(
        split,
        Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );

    let joined = tool
        .invoke(
            obj(vec![
                ("operation", Value::from("join")),
                (
                    "input",
                    Value::Array(vec![Value::from("x"), Value::from("y")]),
                ),
                ("separator", Value::from("-")),
            ]),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(joined, Value::from("x-y"));
}

// Requires python3 on PATH.
#[tokio::test]
#[ignore]
async fn python_tool_frames_result() {
    let registry = builtin_registry(".");
    let tool = registry.get("python").unwrap();
    let result = tool
        .invoke(
            obj(vec![
                ("code", Value::from("result = input['n'] * 2")),
                ("input", obj(vec![("n", Value::Number(21.0))])),
            ]),
            &test_ctx(),
        )
        .await
        .unwrap();
    assert_eq!(result, Value::Number(42.0));
}

// Requires node on PATH.
#[tokio::test]
#[ignore]
async fn code_runner_evaluates_javascript() {
    let registry = builtin_registry(".");
    let tool = registry.get("code-runner").unwrap();
    let result = tool
        .invoke(
            obj(vec![
                ("language", Value::from("javascript")),
                ("code", Value::from("return input.n + 1;")),
                ("input", obj(vec![("n", Value::Number(41.0))])),
            ]),
            &test_ctx(),
        )
        .await
        .unwrap();
    assert_eq!(result, Value::Number(42.0));
}
