use uuid::Uuid;

use crate::error::ChatError;

pub const MAX_NAME_CHARS: usize = 200;

/// Name given to a session created without one: `Chat` plus the first 8 characters of its id.
pub fn default_name(id: Uuid) -> String {
    let id = id.to_string();
    format!("Chat {}", &id[..8])
}

/// Title for a session started by its first message. Whitespace runs collapse to
/// single spaces; text longer than `max_chars` is cut and marked with `...`.
pub fn title_from_message(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

pub fn normalize_name(name: &str) -> Result<String, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("session name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ChatError::Validation(format!(
            "session name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}
