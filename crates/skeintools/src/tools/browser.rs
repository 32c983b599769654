use crate::registry::{require_str, Tool};
use async_trait::async_trait;
use scraper::{Html, Selector};
use skeincore::{ExecutionContext, NodeError, Value};
use std::collections::BTreeMap;

/// Page-reader tool: fetches a URL and extracts the title and visible
/// text, so agent nodes can consume pages without raw markup.
pub struct BrowserTool {
    client: reqwest::Client,
}

impl BrowserTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for BrowserTool {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string());

    let body_text = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    (title, body_text)
}

#[async_trait]
impl Tool for BrowserTool {
    fn id(&self) -> &str {
        "browser"
    }

    fn name(&self) -> &str {
        "Browser"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its title and visible text."
    }

    fn category(&self) -> &str {
        "network"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let url = require_str(&input, "url")?;
        ctx.info(format!("browsing {url}"));

        let response = tokio::select! {
            response = self.client.get(url).send() => response,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("fetch failed: {e}")))?;

        let status = response.status().as_u16();
        let html = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to read page: {e}")))?;

        let (title, text) = extract_text(&html);

        Ok(Value::Object(BTreeMap::from([
            ("url".to_string(), Value::from(url)),
            ("status".to_string(), Value::Number(status as f64)),
            (
                "title".to_string(),
                title.map(Value::String).unwrap_or(Value::Null),
            ),
            ("text".to_string(), Value::String(text)),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extraction_strips_markup() {
        let html = "<html><head><title>Hi</title></head>\
                    <body><h1>Header</h1><p>Para <b>bold</b></p></body></html>";
        let (title, text) = extract_text(html);
        assert_eq!(title.as_deref(), Some("Hi"));
        assert!(text.contains("Header"));
        assert!(text.contains("bold"));
        assert!(!text.contains("<p>"));
    }
}
