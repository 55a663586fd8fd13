//! Error types for server lifecycle operations.

use thiserror::Error;

/// Errors raised while driving the llama-server process.
///
/// These never leave [`crate::ServerHandle`]; they are folded into
/// [`crate::StartOutcome::Failed`] and [`crate::StopOutcome::Failed`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The process could not be spawned.
    #[error("{binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending the termination request failed.
    #[error("{0}")]
    Terminate(std::io::Error),

    /// Querying or reaping the process failed.
    #[error("{0}")]
    Wait(std::io::Error),
}
