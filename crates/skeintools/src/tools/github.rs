use crate::registry::{input_str, require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("skein/", env!("CARGO_PKG_VERSION"));

/// GitHub REST tool. A token comes from the invocation input or the
/// GITHUB_TOKEN environment variable; unauthenticated calls work within
/// GitHub's anonymous rate limits.
pub struct GithubTool {
    client: reqwest::Client,
}

impl GithubTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GithubTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GithubTool {
    fn id(&self) -> &str {
        "github"
    }

    fn name(&self) -> &str {
        "GitHub"
    }

    fn description(&self) -> &str {
        "Query the GitHub REST API: repository metadata, issues, file contents."
    }

    fn category(&self) -> &str {
        "network"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["getRepo", "listIssues", "getContents"]
                },
                "owner": { "type": "string" },
                "repo": { "type": "string" },
                "path": { "type": "string", "description": "For getContents" },
                "token": { "type": "string" }
            },
            "required": ["operation", "owner", "repo"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let operation = require_str(&input, "operation")?;
        let owner = require_str(&input, "owner")?;
        let repo = require_str(&input, "repo")?;

        let url = match operation {
            "getRepo" => format!("{API_BASE}/repos/{owner}/{repo}"),
            "listIssues" => format!("{API_BASE}/repos/{owner}/{repo}/issues"),
            "getContents" => {
                let path = require_str(&input, "path")?;
                format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}")
            }
            other => {
                return Err(NodeError::ExecutionFailed(format!(
                    "unknown github operation: {other}"
                )))
            }
        };

        ctx.info(format!("github {operation} {owner}/{repo}"));

        let mut request = self
            .client
            .get(&url)
            .header("user-agent", USER_AGENT)
            .header("accept", "application/vnd.github+json");

        let token = input_str(&input, "token")
            .map(str::to_string)
            .or_else(|| std::env::var("GITHUB_TOKEN").ok());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            response = request.send() => response,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("github request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::ExecutionFailed(format!(
                "github returned {status}: {body}"
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map(Value::from_json)
            .map_err(|e| NodeError::ExecutionFailed(format!("unparseable github response: {e}")))
    }
}
