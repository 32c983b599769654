use crate::registry::{input_str, require_str, Tool};
use async_trait::async_trait;
use scraper::{Html, Selector};
use skeincore::{ExecutionContext, NodeError, Value};

/// CSS-selector scraping tool: fetch a page and pull out matching
/// elements' text (or a named attribute).
pub struct ScraperTool {
    client: reqwest::Client,
}

impl ScraperTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ScraperTool {
    fn default() -> Self {
        Self::new()
    }
}

fn select(html: &str, selector: &str, attribute: Option<&str>) -> Result<Vec<Value>, NodeError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(selector)
        .map_err(|e| NodeError::ExecutionFailed(format!("invalid selector: {e:?}")))?;

    Ok(document
        .select(&selector)
        .filter_map(|element| match attribute {
            Some(attr) => element.value().attr(attr).map(|v| Value::from(v)),
            None => {
                let text = element.text().collect::<String>().trim().to_string();
                Some(Value::String(text))
            }
        })
        .collect())
}

#[async_trait]
impl Tool for ScraperTool {
    fn id(&self) -> &str {
        "scraper"
    }

    fn name(&self) -> &str {
        "Scraper"
    }

    fn description(&self) -> &str {
        "Fetch a page and extract elements matching a CSS selector."
    }

    fn category(&self) -> &str {
        "network"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "selector": { "type": "string" },
                "attribute": { "type": "string", "description": "Extract this attribute instead of text" }
            },
            "required": ["url", "selector"]
        })
    }

    async fn invoke(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let url = require_str(&input, "url")?;
        let selector = require_str(&input, "selector")?;
        let attribute = input_str(&input, "attribute");

        ctx.info(format!("scraping {url} [{selector}]"));

        let response = tokio::select! {
            response = self.client.get(url).send() => response,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("fetch failed: {e}")))?;

        let html = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to read page: {e}")))?;

        select(&html, selector, attribute).map(Value::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_extracts_text_and_attributes() {
        let html = r#"<ul><li class="x">one</li><li class="x">two</li></ul>
                      <a href="/home">link</a>"#;
        let texts = select(html, "li.x", None).unwrap();
        assert_eq!(texts, vec![Value::from("one"), Value::from("two")]);

        let hrefs = select(html, "a", Some("href")).unwrap();
        assert_eq!(hrefs, vec![Value::from("/home")]);
    }

    #[test]
    fn bad_selector_is_an_error() {
        assert!(select("<p></p>", ":::", None).is_err());
    }
}
