//! Launch configuration for llama-server.

use std::path::PathBuf;
use std::process::Command;

use crate::{DEFAULT_CTX_SIZE, DEFAULT_MODEL_FILENAME, DEFAULT_PORT};

/// Something that knows how to build the command for the server process.
///
/// [`LlamaServerConfig`] is the real implementation; anything else (a shell
/// one-liner in tests, a wrapper script) can stand in for it.
pub trait Launch: Send {
    /// Build the command to spawn. Detaching and stdio are applied by the
    /// handle afterwards.
    fn command(&self) -> Command;

    /// Short name used in logs and error messages.
    fn program(&self) -> String;
}

/// Fixed argument set for a llama-server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlamaServerConfig {
    binary: PathBuf,
    model: PathBuf,
    ctx_size: u32,
    gpu_layers: u32,
    port: u16,
}

impl LlamaServerConfig {
    /// Create a config for the given model with default settings.
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            binary: default_binary(),
            model: model.into(),
            ctx_size: DEFAULT_CTX_SIZE,
            gpu_layers: 0,
            port: DEFAULT_PORT,
        }
    }

    /// Use a specific llama-server executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the context window size.
    pub fn with_ctx_size(mut self, ctx_size: u32) -> Self {
        self.ctx_size = ctx_size;
        self
    }

    /// Set how many layers are offloaded to the GPU.
    pub fn with_gpu_layers(mut self, gpu_layers: u32) -> Self {
        self.gpu_layers = gpu_layers;
        self
    }

    /// Set a custom port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the port this server is configured to listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Arguments passed to llama-server, in order.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model.display().to_string(),
            "-c".to_string(),
            self.ctx_size.to_string(),
            "-ngl".to_string(),
            self.gpu_layers.to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }
}

impl Default for LlamaServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_FILENAME)
    }
}

impl Launch for LlamaServerConfig {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(self.args());
        command
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }
}

/// Name of the llama-server executable for this platform, resolved via PATH.
pub fn default_binary() -> PathBuf {
    let binary_name = if cfg!(target_os = "windows") {
        "llama-server.exe"
    } else {
        "llama-server"
    };
    PathBuf::from(binary_name)
}
