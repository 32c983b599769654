use crate::expr;
use skeincore::{
    AgentData, CodeLanguage, ExecutionContext, HttpData, LoopData, LoopType, Node, NodeData,
    NodeError, Provider, SensorData, ToolData, Value,
};
use skeinllm::{ChatRequest, ModelGateway};
use skeintools::ToolRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Safety cap on loop emissions; a constant-true `while` condition
/// terminates here instead of spinning forever.
pub const MAX_LOOP_ITERATIONS: u64 = 1000;

/// Per-node-type execution semantics: maps the gathered input value to
/// the node's output value.
pub struct NodeDispatcher {
    tools: Arc<ToolRegistry>,
    gateway: Arc<ModelGateway>,
}

impl NodeDispatcher {
    pub fn new(tools: Arc<ToolRegistry>, gateway: Arc<ModelGateway>) -> Self {
        Self { tools, gateway }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub async fn dispatch(
        &self,
        node: &Node,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        if ctx.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        match &node.data {
            // Input nodes receive the execution's input record as their
            // gathered value; output and parallel nodes pass through.
            NodeData::Input(_) | NodeData::Output(_) | NodeData::Parallel(_) => Ok(input),

            NodeData::Merge(_) => Ok(flatten_once(input)),

            NodeData::Condition(data) => {
                let condition = data.condition.as_deref().ok_or_else(|| missing(node, "condition"))?;
                let result = expr::eval_expression(condition, &input).await?;
                Ok(Value::Bool(result.truthy()))
            }

            NodeData::Transform(data) => {
                let transform = data.transform.as_deref().ok_or_else(|| missing(node, "transform"))?;
                expr::eval_expression(transform, &input).await
            }

            NodeData::Prompt(data) => {
                let template = data
                    .prompt_template
                    .as_deref()
                    .ok_or_else(|| missing(node, "promptTemplate"))?;
                Ok(Value::String(render_prompt(template, &data.variables, &input)))
            }

            NodeData::Agent(data) => self.dispatch_agent(node, data, input, ctx).await,

            NodeData::Tool(data) => self.dispatch_tool(node, data, input, ctx).await,

            NodeData::Loop(data) => self.dispatch_loop(node, data, input, ctx).await,

            NodeData::Code(data) => {
                let code = data.code.as_deref().ok_or_else(|| missing(node, "code"))?;
                match data.language {
                    CodeLanguage::Javascript | CodeLanguage::Typescript => {
                        expr::eval_script(code, &input).await
                    }
                    CodeLanguage::Python => {
                        let tool = self.tools.resolve("python")?;
                        let tool_input = Value::Object(BTreeMap::from([
                            ("code".to_string(), Value::from(code)),
                            ("input".to_string(), input),
                        ]));
                        let result = tool.invoke(tool_input, ctx).await;
                        checkpoint(ctx)?;
                        result
                    }
                }
            }

            NodeData::Http(data) => self.dispatch_http(node, data, input, ctx).await,

            NodeData::Sensor(data) => self.dispatch_sensor(node, data, input, ctx).await,
        }
    }

    /// Agent nodes serialize non-string input to JSON for the user prompt
    /// and run one chat turn against the configured provider.
    async fn dispatch_agent(
        &self,
        _node: &Node,
        data: &AgentData,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let provider = match data.provider {
            Some(provider) => provider,
            None => ctx
                .config
                .default_provider
                .parse::<Provider>()
                .map_err(NodeError::ExecutionFailed)?,
        };
        let model = data
            .model
            .clone()
            .unwrap_or_else(|| ctx.config.default_model.clone());
        let user_prompt = match &input {
            Value::String(text) => text.clone(),
            other => other.to_json().to_string(),
        };

        ctx.info(format!("agent call: {} / {}", provider, model));

        let request = ChatRequest {
            provider,
            model,
            system_prompt: data.system_prompt.clone(),
            user_prompt,
            temperature: data.temperature,
            max_tokens: data.max_tokens,
        };
        let completion = self.gateway.chat(&request).await?;
        checkpoint(ctx)?;
        Ok(Value::String(completion))
    }

    /// Tool nodes merge `toolConfig` with `{ input }` and invoke the
    /// registered capability.
    async fn dispatch_tool(
        &self,
        node: &Node,
        data: &ToolData,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let tool_id = data.tool_id.as_deref().ok_or_else(|| missing(node, "toolId"))?;
        let tool = self.tools.resolve(tool_id)?;

        let mut tool_input: BTreeMap<String, Value> =
            data.tool_config.clone().unwrap_or_default();
        tool_input.insert("input".to_string(), input);

        let result = tool.invoke(Value::Object(tool_input), ctx).await;
        checkpoint(ctx)?;
        result
    }

    /// Loop nodes emit a list of per-iteration items; downstream nodes
    /// receive the whole sequence as one value.
    async fn dispatch_loop(
        &self,
        node: &Node,
        data: &LoopData,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let mut items: Vec<Value> = Vec::new();
        match data.loop_type {
            LoopType::For => {
                let count = data
                    .loop_config
                    .count
                    .ok_or_else(|| missing(node, "loopConfig.count"))?
                    .min(MAX_LOOP_ITERATIONS);
                for index in 0..count {
                    checkpoint(ctx)?;
                    items.push(iteration_item(index, &input));
                }
            }
            LoopType::ForEach => match input {
                Value::Array(elements) => {
                    for element in elements {
                        checkpoint(ctx)?;
                        items.push(element);
                    }
                }
                other => items.push(other),
            },
            LoopType::While => {
                let condition = data
                    .loop_config
                    .condition
                    .as_deref()
                    .ok_or_else(|| missing(node, "loopConfig.condition"))?;
                let mut index = 0u64;
                while index < MAX_LOOP_ITERATIONS {
                    checkpoint(ctx)?;
                    let keep_going = expr::eval_expression(condition, &input).await?;
                    if !keep_going.truthy() {
                        break;
                    }
                    items.push(iteration_item(index, &input));
                    index += 1;
                }
            }
        }
        Ok(Value::Array(items))
    }

    /// The `http` node kind interpolates placeholders, then delegates to
    /// the same implementation the `http` tool uses.
    async fn dispatch_http(
        &self,
        node: &Node,
        data: &HttpData,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let url = data.url.as_deref().ok_or_else(|| missing(node, "url"))?;
        let url = interpolate(url, &input);

        let mut tool_input: BTreeMap<String, Value> = BTreeMap::from([
            ("url".to_string(), Value::String(url)),
            ("method".to_string(), Value::from(data.method.as_str())),
        ]);
        if let Some(headers) = &data.headers {
            tool_input.insert(
                "headers".to_string(),
                Value::Object(
                    headers
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                        .collect(),
                ),
            );
        }
        if let Some(body) = &data.body {
            let body = interpolate_value(Value::from_json(body.clone()), &input);
            tool_input.insert("body".to_string(), body);
        }

        let tool = self.tools.resolve("http")?;
        let result = tool.invoke(Value::Object(tool_input), ctx).await;
        checkpoint(ctx)?;
        result
    }

    /// Sensors are out of core: opaque delegation to the registered tool.
    async fn dispatch_sensor(
        &self,
        _node: &Node,
        data: &SensorData,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let tool_id = data.tool_id.as_deref().unwrap_or("sensor");
        let tool = self.tools.resolve(tool_id)?;

        let mut tool_input: BTreeMap<String, Value> =
            data.tool_config.clone().unwrap_or_default();
        tool_input.insert("input".to_string(), input);

        let result = tool.invoke(Value::Object(tool_input), ctx).await;
        checkpoint(ctx)?;
        result
    }
}

/// Cancellation checkpoint after awaited I/O: the work may have finished,
/// but a cancelled execution discards it.
fn checkpoint(ctx: &ExecutionContext) -> Result<(), NodeError> {
    if ctx.is_cancelled() {
        Err(NodeError::Cancelled)
    } else {
        Ok(())
    }
}

fn missing(node: &Node, field: &str) -> NodeError {
    NodeError::MissingData {
        node_id: node.id.clone(),
        field: field.to_string(),
    }
}

fn iteration_item(index: u64, input: &Value) -> Value {
    Value::Object(BTreeMap::from([
        ("index".to_string(), Value::Number(index as f64)),
        ("input".to_string(), input.clone()),
    ]))
}

/// One-level flattening for `merge` nodes.
fn flatten_once(input: Value) -> Value {
    match input {
        Value::Array(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Array(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            Value::Array(flat)
        }
        other => other,
    }
}

/// Render a prompt template: `{{input}}` becomes the stringified input,
/// and each name listed in `variables` becomes the matching input-record
/// field. Missing variables render as the empty string; placeholders not
/// listed are left alone.
fn render_prompt(template: &str, variables: &[String], input: &Value) -> String {
    let mut rendered = template.replace("{{input}}", &input.render());
    for name in variables {
        let placeholder = format!("{{{{{name}}}}}");
        let replacement = input.get(name).map(Value::render).unwrap_or_default();
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

/// Substitute `{{name}}` placeholders from input-record fields; unknown
/// names render as the empty string.
fn interpolate(text: &str, input: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("}}") {
            Some(len) => {
                let name = rest[start + 2..start + 2 + len].trim();
                if name == "input" {
                    out.push_str(&input.render());
                } else {
                    out.push_str(&input.get(name).map(Value::render).unwrap_or_default());
                }
                rest = &rest[start + 2 + len + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Interpolate every string leaf of a body value.
fn interpolate_value(value: Value, input: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(interpolate(&text, input)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| interpolate_value(item, input))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, interpolate_value(v, input)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_fills_known_names_and_blanks_unknown() {
        let input: Value = serde_json::from_str::<serde_json::Value>(r#"{"city": "Oslo"}"#)
            .unwrap()
            .into();
        assert_eq!(
            interpolate("https://api.test/{{city}}/{{missing}}", &input),
            "https://api.test/Oslo/"
        );
    }

    #[test]
    fn prompt_rendering_substitutes_input_and_variables() {
        let input: Value =
            serde_json::from_str::<serde_json::Value>(r#"{"who": "Ada"}"#)
                .unwrap()
                .into();
        let rendered = render_prompt(
            "Summarize {{input}} for {{who}}, leave {{other}}",
            &["who".to_string()],
            &input,
        );
        assert!(rendered.contains("for Ada"));
        assert!(rendered.contains("{{other}}"));
    }

    #[test]
    fn merge_flattens_one_level() {
        let nested = Value::Array(vec![
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
            Value::Number(3.0),
            Value::Array(vec![Value::Array(vec![Value::Number(4.0)])]),
        ]);
        let flat = flatten_once(nested);
        assert_eq!(
            flat,
            Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(3.0),
                Value::Array(vec![Value::Number(4.0)]),
            ])
        );
    }
}
