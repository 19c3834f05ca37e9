//! StreamGate - session-multiplexing gateway for stateful RPC over HTTP.
//!
//! Binds two listeners: the session endpoint (`/mcp`) and the admin
//! endpoint (`/health`, `/status`, `/metrics`). Both drain on SIGINT or
//! SIGTERM; live sessions are closed before exit.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use streamgate::admin::AdminServer;
use streamgate::capability::ProcedureMap;
use streamgate::config::GateConfig;
use streamgate::transport::GateServer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command-line options. Each falls back to the matching `STREAMGATE_*`
/// environment variable, then to the built-in default.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session endpoint listen address
    #[arg(long, env = "STREAMGATE_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Admin endpoint listen address
    #[arg(long, env = "STREAMGATE_ADMIN_LISTEN", default_value = "127.0.0.1:9090")]
    admin_listen: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = GateConfig::from_env()?;
    config.listen_addr = cli.listen;
    config.admin_addr = cli.admin_listen;

    info!(
        listen = %config.listen_addr,
        admin = %config.admin_addr,
        allowed_origins = ?config.allowed_origins,
        allowed_hosts = ?config.allowed_hosts,
        max_body_size = config.max_body_size,
        max_concurrent_requests = config.max_concurrent_requests,
        "StreamGate starting"
    );

    let invoker = Arc::new(ProcedureMap::with_builtins());
    let admin_addr = config.admin_addr.clone();
    let server = GateServer::new(config, invoker);
    let admin = AdminServer::new(admin_addr, server.registry());

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    let admin_shutdown = shutdown.clone();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin.run(admin_shutdown).await {
            error!(error = %e, "Admin server error");
        }
    });

    server.run(shutdown).await?;
    let _ = admin_task.await;

    info!("StreamGate stopped");
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_handlers(shutdown: CancellationToken) {
    let sigint_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                sigint_shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });
}
