//! Conversation data model: messages and the shared conversation state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One chat turn. Serializes to the `{role, content}` wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything the view renders. Lives behind the controller's lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub is_listening: bool,
    pub input_text: String,
    pub error_message: Option<String>,
    pub loading: bool,
    pub is_generating: bool,
    /// Bumped on every reset; replies tagged with an older value are dropped.
    pub session: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the conversation back to a fresh chat.
    ///
    /// Listening state is left alone: it mirrors the recognizer, which keeps
    /// running until it reports its own end.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.input_text.clear();
        self.error_message = None;
        self.loading = false;
        self.is_generating = false;
        self.session += 1;
    }

    /// Write the revealed prefix into the trailing assistant message,
    /// replacing its content. Appends a new assistant message if the last
    /// one isn't an assistant reply.
    pub fn show_partial_reply(&mut self, prefix: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content.clear();
                last.content.push_str(prefix);
            }
            _ => self.messages.push(Message::assistant(prefix)),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
