//! OpenAI-compatible chat-completions client. Also serves Groq, whose API
//! speaks the same dialect at a different base URL.

use crate::{ChatRequest, ProviderFault};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    request: &ChatRequest,
) -> Result<String, ProviderFault> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system_prompt.as_deref() {
        messages.push(Message {
            role: "system",
            content: system,
        });
    }
    messages.push(Message {
        role: "user",
        content: &request.user_prompt,
    });

    let body = CompletionsRequest {
        model: &request.model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };

    tracing::debug!(model = %request.model, base_url, "chat-completions request");

    let response = client
        .post(format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(ProviderFault::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderFault::Http {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: CompletionsResponse = response
        .json()
        .await
        .map_err(|e| ProviderFault::BadResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderFault::BadResponse("response carried no choices".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_wins() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#;
        let parsed: CompletionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices.into_iter().next().unwrap().message.content,
            Some("hi".to_string())
        );
    }
}
