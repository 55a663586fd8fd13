//! Conversation history: alternating user and assistant turns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who wrote a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
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

/// Violations of the user/assistant alternation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("the previous message is still waiting for a reply")]
    AwaitingReply,
    #[error("there is no user message to reply to")]
    NoPendingUser,
}

/// Ordered sequence of turns.
///
/// A user turn is always followed by exactly one assistant turn before the
/// next user turn may be pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn.
    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        if self.is_awaiting_reply() {
            return Err(ConversationError::AwaitingReply);
        }
        self.turns.push(Turn::user(content));
        Ok(())
    }

    /// Append the empty assistant turn that streamed fragments grow into.
    pub fn begin_assistant(&mut self) -> Result<(), ConversationError> {
        if !self.is_awaiting_reply() {
            return Err(ConversationError::NoPendingUser);
        }
        self.turns.push(Turn::assistant(""));
        Ok(())
    }

    /// Append text to the trailing assistant turn.
    pub fn append_to_reply(&mut self, fragment: &str) {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => turn.content.push_str(fragment),
            _ => tracing::warn!("Dropping fragment with no assistant turn to append to"),
        }
    }

    /// Drop a trailing user turn that never got a reply.
    pub fn abandon_pending(&mut self) -> Option<Turn> {
        if self.is_awaiting_reply() {
            self.turns.pop()
        } else {
            None
        }
    }

    /// Discard the whole history.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// True when the last turn is an unanswered user turn.
    pub fn is_awaiting_reply(&self) -> bool {
        matches!(self.turns.last(), Some(turn) if turn.role == Role::User)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
