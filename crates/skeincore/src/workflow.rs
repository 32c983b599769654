use crate::Value;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Complete workflow definition: a named DAG of nodes and edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_node(&mut self, node: Node) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        let id = format!("e-{}-{}", source, target);
        self.edges.push(Edge {
            id,
            source,
            target,
            source_handle: None,
            target_handle: None,
            label: None,
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Directed edge: the target's dispatch requires the source's output.
/// Handles are advisory; the runtime treats every edge as one upstream value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Closed set of node kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Input,
    Output,
    Agent,
    Tool,
    Condition,
    Loop,
    Parallel,
    Merge,
    Transform,
    Prompt,
    Code,
    Http,
    Sensor,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::Output => "output",
            NodeKind::Agent => "agent",
            NodeKind::Tool => "tool",
            NodeKind::Condition => "condition",
            NodeKind::Loop => "loop",
            NodeKind::Parallel => "parallel",
            NodeKind::Merge => "merge",
            NodeKind::Transform => "transform",
            NodeKind::Prompt => "prompt",
            NodeKind::Code => "code",
            NodeKind::Http => "http",
            NodeKind::Sensor => "sensor",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of computation in a workflow.
///
/// The wire shape carries the kind tag in `type` and the kind-specific
/// record in `data`; (de)serialization goes through a single codec that
/// selects the `NodeData` variant from the tag, preserving unknown `data`
/// fields verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub position: Option<Position>,
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            kind: data.kind(),
            label: label.into(),
            position: None,
            data,
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Layout hint for the visual editor; ignored by the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(default)]
    data: serde_json::Value,
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.data.to_json().map_err(serde::ser::Error::custom)?;
        RawNode {
            id: self.id.clone(),
            kind: self.kind,
            label: self.label.clone(),
            position: self.position,
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        let data = NodeData::from_json(raw.kind, raw.data).map_err(D::Error::custom)?;
        Ok(Node {
            id: raw.id,
            kind: raw.kind,
            label: raw.label,
            position: raw.position,
            data,
        })
    }
}

/// Kind-specific node data.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Input(InputData),
    Output(OutputData),
    Agent(AgentData),
    Tool(ToolData),
    Condition(ConditionData),
    Loop(LoopData),
    Parallel(PassthroughData),
    Merge(PassthroughData),
    Transform(TransformData),
    Prompt(PromptData),
    Code(CodeData),
    Http(HttpData),
    Sensor(SensorData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Input(_) => NodeKind::Input,
            NodeData::Output(_) => NodeKind::Output,
            NodeData::Agent(_) => NodeKind::Agent,
            NodeData::Tool(_) => NodeKind::Tool,
            NodeData::Condition(_) => NodeKind::Condition,
            NodeData::Loop(_) => NodeKind::Loop,
            NodeData::Parallel(_) => NodeKind::Parallel,
            NodeData::Merge(_) => NodeKind::Merge,
            NodeData::Transform(_) => NodeKind::Transform,
            NodeData::Prompt(_) => NodeKind::Prompt,
            NodeData::Code(_) => NodeKind::Code,
            NodeData::Http(_) => NodeKind::Http,
            NodeData::Sensor(_) => NodeKind::Sensor,
        }
    }

    pub fn from_json(kind: NodeKind, data: serde_json::Value) -> serde_json::Result<Self> {
        // Absent data decodes as an empty record for every kind.
        let data = if data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            data
        };
        Ok(match kind {
            NodeKind::Input => NodeData::Input(serde_json::from_value(data)?),
            NodeKind::Output => NodeData::Output(serde_json::from_value(data)?),
            NodeKind::Agent => NodeData::Agent(serde_json::from_value(data)?),
            NodeKind::Tool => NodeData::Tool(serde_json::from_value(data)?),
            NodeKind::Condition => NodeData::Condition(serde_json::from_value(data)?),
            NodeKind::Loop => NodeData::Loop(serde_json::from_value(data)?),
            NodeKind::Parallel => NodeData::Parallel(serde_json::from_value(data)?),
            NodeKind::Merge => NodeData::Merge(serde_json::from_value(data)?),
            NodeKind::Transform => NodeData::Transform(serde_json::from_value(data)?),
            NodeKind::Prompt => NodeData::Prompt(serde_json::from_value(data)?),
            NodeKind::Code => NodeData::Code(serde_json::from_value(data)?),
            NodeKind::Http => NodeData::Http(serde_json::from_value(data)?),
            NodeKind::Sensor => NodeData::Sensor(serde_json::from_value(data)?),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            NodeData::Input(d) => serde_json::to_value(d),
            NodeData::Output(d) => serde_json::to_value(d),
            NodeData::Agent(d) => serde_json::to_value(d),
            NodeData::Tool(d) => serde_json::to_value(d),
            NodeData::Condition(d) => serde_json::to_value(d),
            NodeData::Loop(d) => serde_json::to_value(d),
            NodeData::Parallel(d) => serde_json::to_value(d),
            NodeData::Merge(d) => serde_json::to_value(d),
            NodeData::Transform(d) => serde_json::to_value(d),
            NodeData::Prompt(d) => serde_json::to_value(d),
            NodeData::Code(d) => serde_json::to_value(d),
            NodeData::Http(d) => serde_json::to_value(d),
            NodeData::Sensor(d) => serde_json::to_value(d),
        }
    }
}

/// Extra map preserving unknown `data` fields across store round-trips.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputData {
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputData {
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PassthroughData {
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Model provider selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Groq,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
            Provider::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "groq" => Ok(Provider::Groq),
            "ollama" => Ok(Provider::Ollama),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for AgentData {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            extra: ExtraFields::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
    #[default]
    For,
    ForEach,
    While,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopData {
    #[serde(default)]
    pub loop_type: LoopType,
    #[serde(default)]
    pub loop_config: LoopConfig,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    #[default]
    Javascript,
    Typescript,
    Python,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeData {
    #[serde(default)]
    pub language: CodeLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_codec_selects_data_by_type() {
        let json = r#"{
            "id": "n1",
            "type": "transform",
            "label": "Double",
            "data": { "transform": "input * 2" }
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, NodeKind::Transform);
        match &node.data {
            NodeData::Transform(d) => assert_eq!(d.transform.as_deref(), Some("input * 2")),
            other => panic!("wrong data variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_data_fields_survive_round_trip() {
        let json = r#"{
            "id": "n1",
            "type": "agent",
            "label": "Ask",
            "data": {
                "provider": "anthropic",
                "model": "claude-3",
                "editorHint": {"color": "blue"}
            }
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["data"]["editorHint"]["color"], "blue");
        assert_eq!(back["data"]["provider"], "anthropic");
    }

    #[test]
    fn workflow_document_round_trip() {
        let mut wf = Workflow::new("wf-1", "Demo");
        wf.add_node(Node::new("a", "A", NodeData::Input(InputData::default())));
        wf.add_node(Node::new(
            "b",
            "B",
            NodeData::Transform(TransformData {
                transform: Some("input + 1".to_string()),
                extra: ExtraFields::new(),
            }),
        ));
        wf.connect("a", "b");

        let text = serde_json::to_string(&wf).unwrap();
        let back: Workflow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, wf);
        assert_eq!(back.edges[0].source, "a");
    }

    #[test]
    fn missing_data_decodes_as_empty_record() {
        let json = r#"{"id": "o", "type": "output", "label": "Out"}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert!(matches!(node.data, NodeData::Output(_)));
    }
}
