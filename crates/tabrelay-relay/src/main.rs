//! `TabRelay` Relay Server
//!
//! HTTP + WebSocket relay between MCP clients and the browser extension.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tabrelay_core::Config;
use tabrelay_core::tracing_init::init_tracing;
use tabrelay_relay::{RelayConfig, RelayState, build_router};

#[derive(Parser, Debug)]
#[command(name = "tabrelay-relay")]
#[command(version, about = "TabRelay relay server - browser command dispatch")]
struct Args {
    /// Address to listen on. Defaults to TABRELAY_HOST:TABRELAY_PORT.
    #[arg(long)]
    addr: Option<String>,

    /// Seconds to wait for the extension to answer a command.
    #[arg(long, env = "TABRELAY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout: u64,

    /// Commands held for polling before new ones are rejected.
    #[arg(long, env = "TABRELAY_QUEUE_CAPACITY", default_value_t = 256)]
    queue_capacity: usize,

    /// Directory for saved screenshots.
    #[arg(long)]
    screenshots_dir: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, env = "TABRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("tabrelay_relay=info,tabrelay_core=info", args.log_json);

    let config = Config::from_env()?;
    let addr = args.addr.unwrap_or_else(|| config.endpoint.authority());

    let relay_config = RelayConfig {
        request_timeout: Duration::from_secs(args.request_timeout),
        queue_capacity: args.queue_capacity,
        screenshots_dir: args.screenshots_dir.unwrap_or(config.screenshots_dir),
    };
    let state = RelayState::new(&relay_config);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        addr = %addr,
        screenshots_dir = %relay_config.screenshots_dir.display(),
        "Relay listening"
    );

    // Waiting handlers are released as soon as shutdown starts.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state.shutdown().await;
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }
}
