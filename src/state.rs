use anyhow::{anyhow, Context};
use std::sync::Arc;

use crate::chat::ConversationOrchestrator;
use crate::config::AppConfig;
use crate::db::{DuckDbStore, MessageStore, SessionStore};
use crate::llm::{LlmProvider, ModelGateway, ProviderFactory};

/// Components shared by every request handler and CLI command.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

impl AppState {
    pub fn new(store: Arc<DuckDbStore>, provider: Arc<dyn LlmProvider>, config: &AppConfig) -> Self {
        let sessions: Arc<dyn SessionStore> = store.clone();
        let messages: Arc<dyn MessageStore> = store;
        let gateway = ModelGateway::from_config(provider, config);
        let orchestrator = ConversationOrchestrator::new(sessions.clone(), messages.clone(), gateway)
            .with_title_max_chars(config.chat.title_max_chars);

        Self {
            sessions,
            messages,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = DuckDbStore::open(&config.database).context("failed to initialize database")?;
        let provider = ProviderFactory::create(&config.llm).ok_or_else(|| {
            anyhow!(
                "no usable configuration for LLM provider {:?}",
                config.llm.provider
            )
        })?;

        Ok(Self::new(Arc::new(store), provider, config))
    }
}
