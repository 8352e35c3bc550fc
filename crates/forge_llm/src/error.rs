//! Error types for reasoning service calls.

use thiserror::Error;

/// Result type alias for reasoning service operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors raised while talking to a reasoning service.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM not configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    NotConfigured,

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),

    #[error("Reply is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

impl LlmError {
    /// Whether the failure happened before a usable reply existed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured
                | Self::UnknownProvider(_)
                | Self::Network(_)
                | Self::Api { .. }
                | Self::InvalidResponse(_)
                | Self::Embedding(_)
        )
    }
}
