//! Lifecycle handle for a local llama-server process.
//!
//! The application owns exactly one [`ServerHandle`]. Starting it spawns
//! llama-server detached from the caller's console; stopping it asks the
//! process to terminate and escalates to a kill once the grace period runs
//! out. Every outcome is reported as a status value whose `Display` is the
//! text shown to the user, so no error ever escapes the handle.

mod config;
mod error;
mod server;
mod status;

pub use config::{default_binary, Launch, LlamaServerConfig};
pub use error::ServerError;
pub use server::ServerHandle;
pub use status::{ServerStatus, StartOutcome, StopOutcome};

use std::time::Duration;

/// Default port for the llama-server instance.
pub const DEFAULT_PORT: u16 = 8080;

/// Default model file handed to llama-server.
pub const DEFAULT_MODEL_FILENAME: &str = "google_gemma-3-4b-it-Q6_K.gguf";

/// Default context window size.
pub const DEFAULT_CTX_SIZE: u32 = 8196;

/// How long a stop request waits for a graceful exit before killing.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
