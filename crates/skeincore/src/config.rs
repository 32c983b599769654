//! Process configuration — serde structs for `~/.skein/config.json`.
//!
//! Pure types and parsing; the engine snapshots the loaded document into
//! each execution's context, and the model gateway re-reads it on
//! credential refresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Provider credential material keyed by provider name.
    pub providers: BTreeMap<String, ProviderConfig>,
    pub default_provider: String,
    pub default_model: String,
    pub ollama_host: String,
    pub max_concurrent_executions: usize,
    pub max_retries: u32,
    /// Delay between gateway retries, in milliseconds.
    pub retry_delay: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider: "anthropic".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            max_concurrent_executions: 10,
            max_retries: 2,
            retry_delay: 1000,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Config {
    /// Load from a specific path. A missing file yields the defaults;
    /// an unparseable file is an error rather than silent fallback.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}: {}", path.display(), e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Discover from `~/.skein/config.json`.
    pub fn discover() -> std::io::Result<Self> {
        Self::load(&Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skein")
            .join("config.json")
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    /// Resolve a provider credential: explicit configuration first, then
    /// the `{PROVIDER}_API_KEY` environment variable.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        if let Some(key) = self
            .providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .filter(|k| !k.is_empty())
        {
            return Some(key);
        }
        let env_name = format!("{}_API_KEY", provider.to_uppercase());
        std::env::var(env_name).ok().filter(|k| !k.is_empty())
    }

    pub fn base_url_for(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|p| p.base_url.clone())
    }

    pub fn set_api_key(&mut self, provider: &str, key: &str) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .api_key = Some(key.to_string());
    }
}
