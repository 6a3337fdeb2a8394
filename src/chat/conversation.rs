//! Turns a loosely-typed chat history plus a new utterance into the ordered
//! message list sent to the completion service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One prior exchange entry from the UI. Only `user` and `assistant` turns
/// with non-empty text survive; anything else yields `None`.
pub fn parse_turn(entry: &Value) -> Option<ChatMessage> {
    let role = match entry.get("role")?.as_str()? {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };
    let content = entry.get("content")?.as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(ChatMessage::new(role, content))
}

/// Assemble `[system?, ..history window, user]`.
///
/// Malformed history entries are dropped silently. Only the last
/// `history_limit` valid turns are replayed. The user message is appended
/// as-is; blank-message handling belongs to the caller.
pub fn build_messages(
    user_message: &str,
    history: &[Value],
    system_instruction: &str,
    history_limit: usize,
) -> Vec<ChatMessage> {
    let turns: Vec<ChatMessage> = history.iter().filter_map(parse_turn).collect();
    let skip = turns.len().saturating_sub(history_limit);

    let mut messages = Vec::with_capacity(turns.len() - skip + 2);
    if !system_instruction.is_empty() {
        messages.push(ChatMessage::new(Role::System, system_instruction));
    }
    messages.extend(turns.into_iter().skip(skip));
    messages.push(ChatMessage::new(Role::User, user_message));
    messages
}
