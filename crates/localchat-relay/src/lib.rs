//! Conversation history and streaming relay for llama-server's
//! OpenAI-compatible chat-completions endpoint.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  request  ┌──────────────┐  fragments  ┌──────────────┐
//! │ Conversation │ ────────> │  ChatClient  │ ──────────> │    relay     │ ──> snapshots
//! └──────────────┘           └──────────────┘             └──────────────┘
//! ```
//!
//! Each snapshot is the whole conversation so far, with the trailing
//! assistant turn grown by one fragment. Consumers redraw from the
//! snapshot; dropping the stream (or the receiver returned by
//! [`Relay::spawn`]) is the only way to cancel.

mod client;
mod conversation;
mod error;
mod params;
mod relay;

pub use client::{ChatClient, Fragment, FragmentStream};
pub use conversation::{Conversation, ConversationError, Role, Turn};
pub use error::RelayError;
pub use params::SamplingParams;
pub use relay::{relay, Relay, RelayEvent, SnapshotStream};

/// Port llama-server listens on unless told otherwise.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Model name sent with every request.
pub const DEFAULT_MODEL_NAME: &str = "Gemma 3 4B Instruct";

/// Stop marker sent with every request.
pub const DEFAULT_STOP: &str = "<eos>";
