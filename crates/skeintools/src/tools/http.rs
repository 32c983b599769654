use crate::registry::{input_str, require_str, Tool};
use async_trait::async_trait;
use skeincore::{ExecutionContext, NodeError, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP request tool. This is the single HTTP implementation; the `http`
/// node kind delegates here after placeholder interpolation.
pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn id(&self) -> &str {
        "http"
    }

    fn name(&self) -> &str {
        "HTTP Request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and parse the response as JSON when the \
         response content type indicates it, else as text."
    }

    fn category(&self) -> &str {
        "network"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "enum": ["GET", "POST", "PUT", "DELETE", "PATCH"] },
                "headers": { "type": "object" },
                "body": {},
                "timeout": { "type": "integer", "description": "Seconds" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let url = require_str(&input, "url")?;
        let method = input_str(&input, "method").unwrap_or("GET").to_uppercase();
        let timeout_secs = input
            .get("timeout")
            .and_then(Value::as_f64)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        ctx.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            other => {
                return Err(NodeError::ExecutionFailed(format!(
                    "unsupported method: {other}"
                )))
            }
        };
        request = request.timeout(Duration::from_secs(timeout_secs));

        let mut has_content_type = false;
        if let Some(headers) = input.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if key.eq_ignore_ascii_case("content-type") {
                    has_content_type = true;
                }
                request = request.header(key, value.render());
            }
        }

        if let Some(body) = input.get("body") {
            if !body.is_null() {
                if body.as_str().is_some() {
                    request = request.body(body.render());
                } else {
                    // Object bodies go out as JSON with the matching type.
                    if !has_content_type {
                        request = request.header("content-type", "application/json");
                    }
                    request = request.body(body.to_json().to_string());
                }
            }
        }

        let response = tokio::select! {
            response = request.send() => response,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
        .map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout {
                    seconds: timeout_secs,
                }
            } else {
                NodeError::ExecutionFailed(format!("http request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let headers: BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::from(v.to_str().unwrap_or_default()),
                )
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to read response: {e}")))?;

        let body = if content_type.contains("json") {
            serde_json::from_str::<serde_json::Value>(&text)
                .map(Value::from_json)
                .unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        ctx.info(format!("response status: {status}"));

        Ok(Value::Object(BTreeMap::from([
            ("status".to_string(), Value::Number(status as f64)),
            ("headers".to_string(), Value::Object(headers)),
            ("body".to_string(), body),
        ])))
    }
}
