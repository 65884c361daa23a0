#![allow(dead_code)]

use async_stream::try_stream;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use talkgpt::config::{
    AppConfig, ChatConfig, DatabaseConfig, LlmConfig, OllamaConfig, ServerConfig,
};
use talkgpt::db::DuckDbStore;
use talkgpt::llm::models::{ChatOptions, ChatResponse, Message};
use talkgpt::llm::{FragmentStream, LlmError, LlmProvider};
use talkgpt::state::AppState;

/// In-process provider that replays fixed fragments instead of calling a model.
pub struct ScriptedProvider {
    fragments: Vec<String>,
    /// Fail with an API error after this many fragments.
    fail_after: Option<usize>,
    /// Pause before each fragment (and before a blocking reply).
    delay: Duration,
    /// Never finish after the last fragment.
    hang: bool,
    requests: Mutex<Vec<Vec<Message>>>,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn replying(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            fail_after: None,
            delay: Duration::ZERO,
            hang: false,
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Message lists of every request received, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Set once a stream handed out by `chat_stream` has been dropped.
    pub fn stream_dropped(&self) -> Arc<AtomicBool> {
        self.stream_dropped.clone()
    }

    fn record(&self, messages: &[Message]) {
        self.requests.lock().unwrap().push(messages.to_vec());
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse, LlmError> {
        self.record(messages);
        tokio::time::sleep(self.delay).await;

        if self.fail_after.is_some() {
            return Err(LlmError::Api("scripted failure".to_string()));
        }
        Ok(ChatResponse {
            content: self.fragments.concat(),
            model: options.model.clone(),
            usage: None,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<FragmentStream, LlmError> {
        self.record(messages);

        let fragments = self.fragments.clone();
        let fail_after = self.fail_after;
        let delay = self.delay;
        let hang = self.hang;
        let flag = DropFlag(self.stream_dropped.clone());

        let stream = try_stream! {
            let _flag = flag;
            for (i, fragment) in fragments.into_iter().enumerate() {
                if fail_after == Some(i) {
                    Err::<(), _>(LlmError::Api("scripted failure".to_string()))?;
                }
                tokio::time::sleep(delay).await;
                yield fragment;
            }
            if fail_after.is_some() {
                Err::<(), _>(LlmError::Api("scripted failure".to_string()))?;
            }
            if hang {
                std::future::pending::<()>().await;
            }
        };
        Ok(boxed(stream))
    }
}

fn boxed<S>(stream: S) -> FragmentStream
where
    S: futures_util::Stream<Item = Result<String, LlmError>> + Send + 'static,
{
    Box::pin(stream)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: Vec::new(),
        },
        database: DatabaseConfig::in_memory(),
        llm: LlmConfig {
            provider: "ollama".to_string(),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            timeout_secs: 5,
            openai: None,
            anthropic: None,
            ollama: Some(OllamaConfig {
                base_url: "http://localhost:11434".to_string(),
            }),
        },
        chat: ChatConfig::default(),
    }
}

/// App state over a fresh in-memory database and the given provider.
pub fn test_state(provider: Arc<ScriptedProvider>) -> AppState {
    test_state_with(provider, &test_config())
}

pub fn test_state_with(provider: Arc<ScriptedProvider>, config: &AppConfig) -> AppState {
    let store = DuckDbStore::open(&config.database).unwrap();
    AppState::new(Arc::new(store), provider, config)
}
