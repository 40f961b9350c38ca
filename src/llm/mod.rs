pub mod openai_client;

pub use openai_client::OpenAiClient;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by an [`LlmClient`] implementation.
///
/// There is deliberately no retry variant here: the contract is "one
/// attempt, surface the failure" — callers (the pool summarizer, operators)
/// own their own fallback behavior.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("missing required configuration field: {0}")]
    MissingField(&'static str),
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned an error response: {0}")]
    Api(String),
    #[error("failed to parse API response: {0}")]
    Parse(String),
}

/// A one-shot chat-completion backend.
///
/// Implementations must not retry internally; a transient failure is
/// surfaced to the caller as a single [`LlmError`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}
