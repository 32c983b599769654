//! Natural-language workflow generation.
//!
//! The generator is an opaque producer of workflow JSON; its output is
//! parsed and validated like any externally supplied document before the
//! runtime accepts it.

use crate::validator::validate;
use serde::de::Error as _;
use serde::Deserialize;
use skeincore::{
    Config, Edge, Node, Provider, ProviderError, Result, SkeinError, Value, Workflow,
};
use skeinllm::{ChatRequest, ModelGateway};
use std::collections::BTreeMap;
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "\
You translate automation requests into workflow JSON. Respond with a single \
JSON object and nothing else, using this shape:\n\
{\"name\": string, \"description\": string, \"nodes\": [{\"id\": string, \
\"type\": one of input|output|agent|tool|condition|loop|parallel|merge|\
transform|prompt|code|http, \"label\": string, \"data\": object}], \
\"edges\": [{\"id\": string, \"source\": node id, \"target\": node id}]}\n\
The graph must be acyclic, start from an input node, and end at an output \
node. Use transform nodes with a `transform` expression over `input` for \
data manipulation.";

/// The loose document shape a model produces; identity and timestamps
/// are filled in on acceptance.
#[derive(Deserialize)]
struct GeneratedDocument {
    name: String,
    #[serde(default)]
    description: Option<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(default)]
    variables: Option<BTreeMap<String, Value>>,
}

/// Ask the selected provider to draft a workflow for `prompt`, then
/// validate the result before returning it.
pub async fn generate_workflow(
    gateway: &ModelGateway,
    config: &Config,
    prompt: &str,
    provider: Option<Provider>,
) -> Result<Workflow> {
    let provider = match provider {
        Some(p) => p,
        None => config.default_provider.parse::<Provider>().map_err(|_| {
            SkeinError::Provider(ProviderError::Unconfigured(
                config.default_provider.clone(),
            ))
        })?,
    };

    let request = ChatRequest {
        provider,
        model: config.default_model.clone(),
        system_prompt: Some(SYSTEM_PROMPT.to_string()),
        user_prompt: prompt.to_string(),
        temperature: Some(0.2),
        max_tokens: Some(4096),
    };

    let completion = gateway.chat(&request).await?;
    let document = extract_json(&completion).ok_or_else(|| {
        SkeinError::Serialization(serde_json::Error::custom(
            "model response contained no JSON object",
        ))
    })?;
    let generated: GeneratedDocument = serde_json::from_str(document)?;

    let mut workflow = Workflow::new(Uuid::new_v4().to_string(), generated.name);
    workflow.description = generated.description;
    workflow.nodes = generated.nodes;
    workflow.edges = generated.edges;
    workflow.variables = generated.variables;

    validate(&workflow)?;
    Ok(workflow)
}

/// Slice out the outermost JSON object, tolerating code fences and prose
/// around it.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
