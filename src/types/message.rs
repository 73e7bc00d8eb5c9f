//! Unified chat message.

use serde::{Deserialize, Serialize};

/// One chat turn. Order within a request is caller-defined and preserved by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, text)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// First system message's content, if any.
pub(crate) fn first_system(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
}

/// All user turns joined with blank lines, in order.
pub(crate) fn joined_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System text followed by every user turn, blank-line separated; either part may be empty.
pub(crate) fn fold_prompt(system: &str, messages: &[Message]) -> String {
    let user = joined_user_text(messages);
    match (system.is_empty(), user.is_empty()) {
        (true, _) => user,
        (false, true) => system.to_string(),
        (false, false) => format!("{}\n\n{}", system, user),
    }
}
