use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::naming;
use crate::config::ChatConfig;
use crate::db::{Message, MessageStore, Role, SessionStore};
use crate::error::ChatError;
use crate::llm::ModelGateway;

/// A completed user/assistant exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub session_id: Uuid,
    pub user_message: Message,
    pub assistant_message: Message,
}

/// One event of a streamed reply. `Done` and `Failed` are terminal and always last.
#[derive(Debug)]
pub enum ChatEvent {
    Fragment(String),
    /// The reply finished and was stored as this message.
    Done(Message),
    /// Generation or storage failed; nothing was stored for the assistant turn.
    Failed(ChatError),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done(_) | ChatEvent::Failed(_))
    }
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// A streamed reply in progress. The user message is already stored.
/// Dropping `events` before the terminal event cancels generation.
pub struct ChatStream {
    pub session_id: Uuid,
    pub user_message: Message,
    pub events: ChatEventStream,
}

pub enum ChatReply {
    Complete(ChatTurn),
    Streaming(ChatStream),
}

/// Stored history plus the user message that was just appended.
struct PendingTurn {
    session_id: Uuid,
    history: Vec<Message>,
    user_message: Message,
}

/// Logs when a streamed turn is dropped before reaching a terminal event.
struct StreamGuard {
    session_id: Uuid,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!(session_id = %self.session_id, "reply stream cancelled, assistant turn discarded");
        }
    }
}

pub struct ConversationOrchestrator {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    gateway: ModelGateway,
    title_max_chars: usize,
}

impl ConversationOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        gateway: ModelGateway,
    ) -> Self {
        Self {
            sessions,
            messages,
            gateway,
            title_max_chars: ChatConfig::default().title_max_chars,
        }
    }

    /// Bounds the length of titles derived from first messages.
    pub fn with_title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars.clamp(1, naming::MAX_NAME_CHARS - 3);
        self
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    /// Handles one user message. Without `session_id` a new session is created first.
    pub async fn handle(
        &self,
        session_id: Option<Uuid>,
        text: &str,
        streaming: bool,
    ) -> Result<ChatReply, ChatError> {
        if streaming {
            self.stream_turn(session_id, text).await.map(ChatReply::Streaming)
        } else {
            self.complete_turn(session_id, text).await.map(ChatReply::Complete)
        }
    }

    /// Blocking mode: waits for the full reply and stores it.
    ///
    /// On a gateway failure the user message stays stored and no assistant message is written.
    pub async fn complete_turn(&self, session_id: Option<Uuid>, text: &str) -> Result<ChatTurn, ChatError> {
        let turn = self.begin_turn(session_id, text).await?;
        let session_id = turn.session_id;

        debug!(%session_id, "generating reply");
        let content = match self.gateway.complete(&turn.history).await {
            Ok(content) => content,
            Err(e) => {
                let err = ChatError::from(e);
                warn!(%session_id, kind = err.kind(), "generation failed: {}", err);
                return Err(err);
            }
        };

        debug!(%session_id, "persisting assistant message");
        let assistant_message = self
            .messages
            .append(session_id, Role::Assistant, content)
            .await?;
        info!(%session_id, sequence = assistant_message.sequence, "turn complete");

        Ok(ChatTurn {
            session_id,
            user_message: turn.user_message,
            assistant_message,
        })
    }

    /// Streaming mode: returns once the user message is stored. Fragments are
    /// forwarded in order; the concatenated reply is stored only if the stream
    /// completes.
    pub async fn stream_turn(&self, session_id: Option<Uuid>, text: &str) -> Result<ChatStream, ChatError> {
        let turn = self.begin_turn(session_id, text).await?;
        let session_id = turn.session_id;

        debug!(%session_id, "streaming reply");
        let mut fragments = self.gateway.complete_streaming(&turn.history);
        let messages = self.messages.clone();

        let events = stream! {
            let mut guard = StreamGuard { session_id, finished: false };
            let mut content = String::new();
            let mut failure = None;

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        content.push_str(&fragment);
                        yield ChatEvent::Fragment(fragment);
                    }
                    Err(e) => {
                        failure = Some(ChatError::from(e));
                        break;
                    }
                }
            }
            guard.finished = true;

            if let Some(err) = failure {
                warn!(%session_id, kind = err.kind(), "streamed generation failed: {}", err);
                yield ChatEvent::Failed(err);
            } else {
                debug!(%session_id, chars = content.len(), "persisting streamed assistant message");
                match messages.append(session_id, Role::Assistant, content).await {
                    Ok(message) => {
                        info!(%session_id, sequence = message.sequence, "streamed turn complete");
                        yield ChatEvent::Done(message);
                    }
                    Err(err) => {
                        error!(%session_id, "failed to persist streamed reply: {}", err);
                        yield ChatEvent::Failed(err);
                    }
                }
            }
        };

        Ok(ChatStream {
            session_id,
            user_message: turn.user_message,
            events: Box::pin(events),
        })
    }

    /// Validates the input, resolves or creates the session, loads its history and
    /// stores the user message. Nothing is generated unless this succeeds.
    async fn begin_turn(&self, session_id: Option<Uuid>, text: &str) -> Result<PendingTurn, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".to_string()));
        }

        let session_id = match session_id {
            Some(id) => id,
            None => {
                let title = naming::title_from_message(text, self.title_max_chars);
                let session = self.sessions.create(Some(title)).await?;
                info!(session_id = %session.id, name = %session.name, "started new session");
                session.id
            }
        };

        let mut history = self.messages.list(session_id).await?;
        debug!(%session_id, turns = history.len(), "history loaded");

        let user_message = self
            .messages
            .append(session_id, Role::User, text.to_string())
            .await?;
        debug!(%session_id, sequence = user_message.sequence, "user message persisted");
        history.push(user_message.clone());

        Ok(PendingTurn {
            session_id,
            history,
            user_message,
        })
    }
}
