//! Ollama local chat client.

use crate::{ChatRequest, ProviderFault};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

pub(crate) async fn chat(
    client: &reqwest::Client,
    host: &str,
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

    let body = OllamaRequest {
        model: &request.model,
        messages,
        stream: false,
        options: Options {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        },
    };

    tracing::debug!(model = %request.model, host, "ollama chat request");

    let response = client
        .post(format!("{}/api/chat", host.trim_end_matches('/')))
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

    let parsed: OllamaResponse = response
        .json()
        .await
        .map_err(|e| ProviderFault::BadResponse(e.to_string()))?;
    Ok(parsed.message.content)
}
