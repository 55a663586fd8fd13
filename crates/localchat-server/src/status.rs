//! Outcomes reported by the server handle.

use std::fmt;

/// Liveness of the tracked session, as seen by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// A process is tracked and still alive.
    Running { pid: u32 },
    /// A process was tracked but has exited on its own.
    Exited,
    /// No process has been started, or the last one was stopped.
    Absent,
}

impl ServerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ServerStatus::Running { pid } => Some(*pid),
            _ => None,
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned.
    Started { pid: u32 },
    /// A live session already existed; nothing was done.
    AlreadyRunning { pid: u32 },
    /// Spawning failed.
    Failed(String),
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid } => write!(f, "Server started with PID: {}", pid),
            StartOutcome::AlreadyRunning { .. } => write!(f, "Server is already running!"),
            StartOutcome::Failed(msg) => write!(f, "Failed to start server: {}", msg),
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No session was ever started (or it was already stopped).
    NothingToStop,
    /// A session was tracked but its process had already exited.
    NotRunning,
    /// The process exited within the grace period.
    Stopped,
    /// The grace period ran out and the process was killed.
    Killed,
    /// The termination call itself failed.
    Failed(String),
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NothingToStop => write!(f, "No server is running!"),
            StopOutcome::NotRunning => write!(f, "Server is not running!"),
            StopOutcome::Stopped => write!(f, "Server stopped successfully!"),
            StopOutcome::Killed => write!(f, "Server killed forcefully!"),
            StopOutcome::Failed(msg) => write!(f, "Error stopping server: {}", msg),
        }
    }
}
