use thiserror::Error;
use uuid::Uuid;

use crate::llm::LlmError;

/// Failure of a session, message or chat operation.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("model request timed out")]
    UpstreamTimeout,
    #[error("request rejected by content policy: {0}")]
    ContentPolicy(String),
    #[error("invalid request: {0}")]
    Validation(String),
}

impl ChatError {
    /// Stable tag carried in HTTP error bodies and stream error events.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::Storage(_) => "storage_error",
            ChatError::Upstream(_) => "upstream_error",
            ChatError::UpstreamTimeout => "upstream_timeout",
            ChatError::ContentPolicy(_) => "content_policy",
            ChatError::Validation(_) => "validation_error",
        }
    }
}

impl From<duckdb::Error> for ChatError {
    fn from(e: duckdb::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<LlmError> for ChatError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => ChatError::UpstreamTimeout,
            LlmError::ContentPolicy(msg) => ChatError::ContentPolicy(msg),
            other => ChatError::Upstream(other.to_string()),
        }
    }
}
