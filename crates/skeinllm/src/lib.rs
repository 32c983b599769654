//! Model gateway: one `chat` contract over multiple provider backends.
//!
//! Providers are selected per call; credentials come from the live
//! configuration snapshot and can be refreshed without restarting the
//! process.

mod anthropic;
mod gateway;
mod ollama;
mod openai;

pub use gateway::{ChatRequest, ModelGateway};

/// Provider-internal fault, classified by the gateway into the public
/// `ProviderError` taxonomy and used for the retry decision.
#[derive(Debug)]
pub(crate) enum ProviderFault {
    Timeout,
    Http { status: u16, message: String },
    Transport(String),
    BadResponse(String),
}

impl ProviderFault {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderFault::Timeout
        } else {
            ProviderFault::Transport(err.to_string())
        }
    }

    /// Transient faults are worth retrying: timeouts, transport drops,
    /// rate limits, and server-side errors.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ProviderFault::Timeout | ProviderFault::Transport(_) => true,
            ProviderFault::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderFault::BadResponse(_) => false,
        }
    }
}
