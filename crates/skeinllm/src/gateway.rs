use crate::{anthropic, ollama, openai, ProviderFault};
use skeincore::{Config, Provider, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// One chat turn against a selected provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub provider: Provider,
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Uniform chat interface over the supported providers.
///
/// Holds the live configuration snapshot; `refresh` swaps it atomically
/// so key rotation needs no process restart. Transient faults retry with
/// the configured `maxRetries`/`retryDelay`.
pub struct ModelGateway {
    client: reqwest::Client,
    config: RwLock<Arc<Config>>,
}

impl ModelGateway {
    pub fn new(config: Arc<Config>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config: RwLock::new(config),
        }
    }

    /// Swap the live configuration snapshot.
    pub async fn refresh(&self, config: Arc<Config>) {
        *self.config.write().await = config;
    }

    pub async fn config(&self) -> Arc<Config> {
        self.config.read().await.clone()
    }

    /// Run one chat completion, returning the model's text.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let config = self.config().await;
        let provider = request.provider;
        let name = provider.as_str();

        // Ollama is local and unauthenticated; everything else needs a key.
        let api_key = match provider {
            Provider::Ollama => None,
            _ => Some(
                config
                    .api_key_for(name)
                    .ok_or_else(|| ProviderError::Unconfigured(name.to_string()))?,
            ),
        };

        let max_attempts = config.max_retries.saturating_add(1);
        let retry_delay = Duration::from_millis(config.retry_delay);
        let mut attempt = 1u32;

        loop {
            let result = self.call(&config, api_key.as_deref(), request).await;
            match result {
                Ok(text) => return Ok(text),
                Err(fault) if fault.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        provider = name,
                        attempt,
                        max_attempts,
                        "provider call failed transiently: {:?}",
                        fault
                    );
                    tokio::time::sleep(retry_delay).await;
                    attempt += 1;
                }
                Err(fault) => return Err(classify(name, fault)),
            }
        }
    }

    async fn call(
        &self,
        config: &Config,
        api_key: Option<&str>,
        request: &ChatRequest,
    ) -> Result<String, ProviderFault> {
        match request.provider {
            Provider::Anthropic => {
                let base = config
                    .base_url_for("anthropic")
                    .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string());
                anthropic::chat(&self.client, &base, api_key.unwrap_or_default(), request).await
            }
            Provider::OpenAi => {
                let base = config
                    .base_url_for("openai")
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
                openai::chat(&self.client, &base, api_key.unwrap_or_default(), request).await
            }
            Provider::Groq => {
                // Groq speaks the OpenAI chat-completions dialect.
                let base = config
                    .base_url_for("groq")
                    .unwrap_or_else(|| GROQ_BASE_URL.to_string());
                openai::chat(&self.client, &base, api_key.unwrap_or_default(), request).await
            }
            Provider::Ollama => {
                ollama::chat(&self.client, &config.ollama_host, request).await
            }
        }
    }
}

fn classify(provider: &str, fault: ProviderFault) -> ProviderError {
    match fault {
        ProviderFault::Timeout => ProviderError::Timeout {
            provider: provider.to_string(),
            seconds: REQUEST_TIMEOUT.as_secs(),
        },
        ProviderFault::Http { status, message } => ProviderError::Backend {
            provider: provider.to_string(),
            message: format!("{}: {}", status, message),
        },
        ProviderFault::Transport(message) | ProviderFault::BadResponse(message) => {
            ProviderError::Backend {
                provider: provider.to_string(),
                message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credential_is_unconfigured() {
        let gateway = ModelGateway::new(Arc::new(Config::default()));
        let request = ChatRequest {
            provider: Provider::Groq,
            model: "llama3".to_string(),
            system_prompt: None,
            user_prompt: "hi".to_string(),
            temperature: None,
            max_tokens: None,
        };
        std::env::remove_var("GROQ_API_KEY");
        match gateway.chat(&request).await {
            Err(ProviderError::Unconfigured(p)) => assert_eq!(p, "groq"),
            other => panic!("expected Unconfigured, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn refresh_swaps_snapshot() {
        let gateway = ModelGateway::new(Arc::new(Config::default()));
        let mut rotated = Config::default();
        rotated.set_api_key("groq", "new-key");
        gateway.refresh(Arc::new(rotated)).await;
        assert_eq!(
            gateway.config().await.api_key_for("groq").as_deref(),
            Some("new-key")
        );
    }
}
