pub mod anthropic;
pub mod gateway;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod stream;

use anthropic::AnthropicProvider;
use ollama::OllamaProvider;
use openai::OpenAiProvider;

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::config::LlmConfig;
use models::{ChatOptions, ChatResponse, Message};

pub use gateway::ModelGateway;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("API Error: {0}")]
    Api(String),
    #[error("Invalid Response: {0}")]
    InvalidResponse(String),
    #[error("Rate Limited")]
    RateLimited,
    #[error("Request Timed Out")]
    Timeout,
    #[error("Content Policy: {0}")]
    ContentPolicy(String),
}

impl LlmError {
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        LlmError::Network(e.to_string())
    }

    /// The response body closed before the provider's end-of-reply marker.
    pub(crate) fn incomplete_stream() -> Self {
        LlmError::InvalidResponse("stream ended before completion".to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

/// Text fragments of a reply in emission order. The stream ends after the last
/// fragment, or yields one `Err` and ends when generation fails.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

pub(crate) fn boxed<S>(stream: S) -> FragmentStream
where
    S: Stream<Item = Result<String, LlmError>> + Send + 'static,
{
    Box::pin(stream)
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse, LlmError>;

    /// Starts a streamed completion. Dropping the returned stream aborts the request.
    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<FragmentStream, LlmError>;
}

/// Builds the provider selected by `llm.provider`.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
        match config.provider.as_str() {
            "openai" => {
                let cfg = config.openai.as_ref()?;
                Some(Arc::new(OpenAiProvider::new(
                    cfg.api_key.clone(),
                    cfg.api_base.clone(),
                )))
            }
            "anthropic" => {
                let cfg = config.anthropic.as_ref()?;
                Some(Arc::new(AnthropicProvider::new(
                    cfg.api_key.clone(),
                    cfg.api_base.clone(),
                )))
            }
            "ollama" => {
                let cfg = config.ollama.as_ref()?;
                Some(Arc::new(OllamaProvider::new(cfg.base_url.clone())))
            }
            _ => None,
        }
    }
}

/// Passes successful responses through and classifies failed ones.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(classify_failure(provider, status, text))
}

fn classify_failure(provider: &str, status: reqwest::StatusCode, body: String) -> LlmError {
    use reqwest::StatusCode;

    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout,
        s if s.is_client_error() && mentions_content_policy(&body) => LlmError::ContentPolicy(body),
        s => LlmError::Api(format!("{} Error {}: {}", provider, s, body)),
    }
}

pub(crate) fn mentions_content_policy(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("content_policy") || text.contains("content_filter") || text.contains("content policy")
}
