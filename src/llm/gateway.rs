use async_stream::try_stream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::config::AppConfig;
use crate::db;
use crate::llm::{
    models::{ChatOptions, Message},
    boxed, FragmentStream, LlmError, LlmProvider,
};

/// Turns stored conversation history into provider requests, with the
/// generation settings and timeout fixed at construction.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    options: ChatOptions,
    timeout: Duration,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, options: ChatOptions, timeout: Duration) -> Self {
        Self {
            provider,
            options,
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &AppConfig) -> Self {
        let options = ChatOptions {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            system_prompt: config.chat.system_prompt.clone(),
        };
        Self::new(provider, options, config.llm.timeout())
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn to_request(history: &[db::Message]) -> Vec<Message> {
        history.iter().map(Message::from).collect()
    }

    /// Full reply for `history` (oldest first), bounded by the configured timeout.
    pub async fn complete(&self, history: &[db::Message]) -> Result<String, LlmError> {
        let messages = Self::to_request(history);
        debug!(
            provider = self.provider.name(),
            model = %self.options.model,
            turns = messages.len(),
            "requesting completion"
        );

        let response = timeout(self.timeout, self.provider.chat(&messages, &self.options))
            .await
            .map_err(|_| LlmError::Timeout)??;
        Ok(response.content)
    }

    /// Reply for `history` as a stream of fragments. The whole generation shares one
    /// deadline; running past it ends the stream with `LlmError::Timeout`.
    pub fn complete_streaming(&self, history: &[db::Message]) -> FragmentStream {
        let messages = Self::to_request(history);
        let provider = self.provider.clone();
        let options = self.options.clone();
        let deadline = Instant::now() + self.timeout;
        debug!(
            provider = provider.name(),
            model = %options.model,
            turns = messages.len(),
            "requesting streamed completion"
        );

        boxed(try_stream! {
            let mut fragments = timeout_at(deadline, provider.chat_stream(&messages, &options))
                .await
                .map_err(|_| LlmError::Timeout)??;

            while let Some(fragment) = timeout_at(deadline, fragments.next())
                .await
                .map_err(|_| LlmError::Timeout)?
            {
                let fragment = fragment?;
                if !fragment.is_empty() {
                    yield fragment;
                }
            }
        })
    }
}
