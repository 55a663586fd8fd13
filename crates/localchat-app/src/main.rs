//! localchat - chat with a local llama-server model from the browser.

use clap::Parser;
use miette::IntoDiagnostic;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use localchat_relay::{ChatClient, Relay, DEFAULT_MODEL_NAME};
use localchat_server::{
    default_binary, LlamaServerConfig, ServerHandle, DEFAULT_CTX_SIZE, DEFAULT_MODEL_FILENAME,
    DEFAULT_PORT,
};

mod app;
mod shutdown;
mod web;

use app::AppContext;
use shutdown::{ShutdownCoordinator, SHUTDOWN_DELAY};

/// Chat with a local model served by llama.cpp
#[derive(Parser)]
#[command(name = "localchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// llama-server executable
    #[arg(long, default_value_os_t = default_binary())]
    server_bin: PathBuf,

    /// GGUF model file handed to llama-server
    #[arg(short, long, default_value = DEFAULT_MODEL_FILENAME)]
    model: PathBuf,

    /// Context window size
    #[arg(long, default_value_t = DEFAULT_CTX_SIZE)]
    ctx_size: u32,

    /// Layers offloaded to the GPU
    #[arg(long, default_value_t = 0)]
    gpu_layers: u32,

    /// Port llama-server listens on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Model name sent with chat requests
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    model_name: String,

    /// Address the browser UI is served on
    #[arg(long, default_value = "127.0.0.1:7860")]
    listen: SocketAddr,

    /// Don't open the browser on startup
    #[arg(long)]
    no_browser: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn server_config(&self) -> LlamaServerConfig {
        LlamaServerConfig::new(&self.model)
            .with_binary(&self.server_bin)
            .with_ctx_size(self.ctx_size)
            .with_gpu_layers(self.gpu_layers)
            .with_port(self.port)
    }

    fn chat_client(&self) -> ChatClient {
        ChatClient::with_port(self.port).with_model(&self.model_name)
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let ctx = Arc::new(AppContext::new(
        ServerHandle::new(cli.server_config()),
        Relay::new(cli.chat_client()),
        ShutdownCoordinator::new(CancellationToken::new(), SHUTDOWN_DELAY),
    ));
    let exit = ctx.shutdown().exit_token();

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .into_diagnostic()?;
    let url = format!("http://{}", listener.local_addr().into_diagnostic()?);

    println!("localchat is running at {}", url);
    println!("Model: {} (llama-server port {})", cli.model.display(), cli.port);

    if !cli.no_browser {
        if let Err(e) = open::that(&url) {
            warn!("Could not open browser: {}", e);
        }
    }

    let server = axum::serve(listener, web::router(Arc::clone(&ctx))).into_future();

    tokio::select! {
        result = server => result.into_diagnostic()?,
        _ = exit.cancelled() => info!("Shutdown delay elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let outcome = tokio::task::spawn_blocking(move || ctx.stop_server())
        .await
        .map_err(|e| miette::miette!("Failed to stop server: {}", e))?;
    info!("{}", outcome);

    Ok(())
}
