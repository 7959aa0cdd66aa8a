//! Entry point for the shellcore MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), wires a process-wide shutdown signal to Ctrl-C, and serves
//! on stdin/stdout.

use shellcore::server::ShellCoreServer;
use shellcore::session::ShutdownSignal;
use anyhow::Result;
use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("starting shellcore MCP server v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = ShutdownSignal::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal, draining sessions");
            signal_shutdown.stop();
        }
    });

    let server = ShellCoreServer::new(shutdown);
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    tracing::info!("shellcore server shut down");
    Ok(())
}
