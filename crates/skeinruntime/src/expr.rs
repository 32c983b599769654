//! Sandboxed evaluation of user expressions and scripts.
//!
//! `condition`, `transform`, and JS-family `code` nodes evaluate user
//! source in an embedded rhai engine. The engine has no filesystem,
//! network, or timer access; the sole binding is `input`; evaluation is
//! bounded by an operation limit and a wall-clock deadline. Evaluation is
//! CPU-bound, so it runs on the blocking pool.

use rhai::{Dynamic, Engine, Scope};
use skeincore::{NodeError, Value};
use std::time::{Duration, Instant};

const EXPR_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_OPERATIONS: u64 = 500_000;
const MAX_EXPR_DEPTH: usize = 64;

fn build_engine(deadline: Instant) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some("expression deadline exceeded".into())
        } else {
            None
        }
    });
    engine
}

fn scope_with_input(input: &Value) -> Result<Scope<'static>, NodeError> {
    let dynamic = rhai::serde::to_dynamic(input.to_json())
        .map_err(|e| NodeError::Expression(format!("input binding failed: {e}")))?;
    let mut scope = Scope::new();
    scope.push_dynamic("input", dynamic);
    Ok(scope)
}

fn to_value(result: Dynamic) -> Result<Value, NodeError> {
    let json: serde_json::Value = rhai::serde::from_dynamic(&result)
        .map_err(|e| NodeError::Expression(format!("result conversion failed: {e}")))?;
    Ok(Value::from_json(json))
}

fn eval_expression_sync(expr: &str, input: &Value) -> Result<Value, NodeError> {
    let engine = build_engine(Instant::now() + EXPR_TIMEOUT);
    let mut scope = scope_with_input(input)?;
    let result = engine
        .eval_expression_with_scope::<Dynamic>(&mut scope, expr)
        .map_err(|e| NodeError::Expression(e.to_string()))?;
    to_value(result)
}

fn eval_script_sync(source: &str, input: &Value) -> Result<Value, NodeError> {
    let engine = build_engine(Instant::now() + EXPR_TIMEOUT);
    let mut scope = scope_with_input(input)?;
    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, source)
        .map_err(|e| NodeError::Expression(e.to_string()))?;
    to_value(result)
}

/// Evaluate a single expression (`transform`, `condition`, `loop` while
/// conditions) over the gathered input value.
pub async fn eval_expression(expr: &str, input: &Value) -> Result<Value, NodeError> {
    let expr = expr.to_string();
    let input = input.clone();
    tokio::task::spawn_blocking(move || eval_expression_sync(&expr, &input))
        .await
        .map_err(|e| NodeError::ExecutionFailed(format!("evaluator task failed: {e}")))?
}

/// Evaluate a full script (`code` nodes in the JS family); statements are
/// allowed and the final expression is the result.
pub async fn eval_script(source: &str, input: &Value) -> Result<Value, NodeError> {
    let source = source.to_string();
    let input = input.clone();
    tokio::task::spawn_blocking(move || eval_script_sync(&source, &input))
        .await
        .map_err(|e| NodeError::ExecutionFailed(format!("evaluator task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn arithmetic_over_input() {
        let result = eval_expression("input * 2", &Value::Number(3.0)).await.unwrap();
        assert_eq!(result, Value::Number(6.0));
    }

    #[tokio::test]
    async fn field_access_on_object_input() {
        let input: Value = serde_json::from_str::<serde_json::Value>(r#"{"n": 20}"#)
            .unwrap()
            .into();
        let result = eval_expression("input.n + 1", &input).await.unwrap();
        assert_eq!(result, Value::Number(21.0));
    }

    #[tokio::test]
    async fn unknown_variable_fails() {
        let result = eval_expression("nonexistent.field", &Value::Null).await;
        assert!(matches!(result, Err(NodeError::Expression(_))));
    }

    #[tokio::test]
    async fn scripts_allow_statements() {
        let result = eval_script("let x = input + 1; x * 10", &Value::Number(2.0))
            .await
            .unwrap();
        assert_eq!(result, Value::Number(30.0));
    }

    #[tokio::test]
    async fn runaway_evaluation_is_bounded() {
        let result = eval_expression(
            "loop { }",
            &Value::Null,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn no_ambient_authority() {
        // The engine has no file or process builtins to call.
        assert!(eval_script("open(\"/etc/passwd\")", &Value::Null).await.is_err());
    }
}
