use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Message;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub message: String,
}

/// One `data:` frame of `/api/chat/stream`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StreamFrame<'a> {
    Fragment {
        session_id: Uuid,
        content: &'a str,
    },
    Done {
        session_id: Uuid,
        done: bool,
        assistant_message: &'a Message,
    },
    Error {
        session_id: Uuid,
        error: String,
        kind: &'static str,
    },
}

impl StreamFrame<'_> {
    pub fn to_sse(&self) -> String {
        // Serializing these plain structs cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n\n", json)
    }
}
