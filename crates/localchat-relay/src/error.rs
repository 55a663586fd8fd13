//! Error types for the streaming relay.

use thiserror::Error;

use crate::conversation::ConversationError;

/// Errors that can occur while relaying a chat completion.
#[derive(Debug, Error)]
pub enum RelayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("API error: {0}")]
    Api(String),

    /// Server is not running or not reachable.
    #[error("Server not running at {0}. Start the model server first")]
    ServerNotRunning(String),

    /// The event stream broke off mid-response.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Temperature or token limit out of range.
    #[error("Invalid sampling parameters: {0}")]
    InvalidParams(String),

    /// The conversation was not in a state to accept a reply.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}
