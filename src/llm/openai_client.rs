use super::{LlmClient, LlmError};
use crate::config::ModelParameters;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

/// A chat-completion client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct OpenAiClient {
    http_client: HttpClient,
    base_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Builds a client from validated [`ModelParameters`].
    ///
    /// Missing `name`, `api_base` or `api_key` is a construction-time error
    /// (`LlmError::MissingField`), matching the contract in §4.1 — the
    /// caller is expected to have already run [`ModelParameters::validate`],
    /// but this constructor re-checks defensively since it is the last line
    /// of defense before a request would otherwise be sent with an empty key.
    pub fn new(params: &ModelParameters) -> Result<Self, LlmError> {
        if params.name.trim().is_empty() {
            return Err(LlmError::MissingField("name"));
        }
        if params.api_base.trim().is_empty() {
            return Err(LlmError::MissingField("api_base"));
        }
        if params.api_key.trim().is_empty() {
            return Err(LlmError::MissingField("api_key"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", params.api_key))
                .map_err(|e| LlmError::Parse(format!("invalid api_key header value: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(LlmError::Transport)?;

        Ok(Self {
            http_client,
            base_url: params.api_base.trim_end_matches('/').to_string(),
            model: params.name.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    #[instrument(skip(self, system, user))]
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, "sending chat completion request");

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(LlmError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "LLM API returned an error");
            return Err(LlmError::Api(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Parse("response had no message content".to_string()))?;

        Ok(content)
    }
}
