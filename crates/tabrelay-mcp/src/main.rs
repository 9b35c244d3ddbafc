//! `TabRelay` MCP front door
//!
//! stdout carries JSON-RPC lines; logs go to stderr.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use tabrelay_core::Config;
use tabrelay_core::client::RelayClient;
use tabrelay_core::probe::{HealthProbe, HttpProber};
use tabrelay_core::process::{DetachedLauncher, resolve_relay_bin, select_process_probe};
use tabrelay_core::supervisor::{RestartPolicy, Supervisor};
use tabrelay_core::tracing_init::init_tracing;
use tabrelay_mcp::McpServer;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tabrelay-mcp")]
#[command(version, about = "TabRelay MCP server over stdio")]
struct Args {
    /// Use a relay that is already running instead of starting one.
    #[arg(long, env = "TABRELAY_NO_SUPERVISOR")]
    no_supervisor: bool,

    /// Emit JSON log lines.
    #[arg(long, env = "TABRELAY_LOG_JSON")]
    log_json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing("tabrelay_mcp=info,tabrelay_core=info", args.log_json);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };
    let code = match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "MCP server failed");
            ExitCode::FAILURE
        }
    };
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    info!(endpoint = %config.endpoint, "MCP server starting");

    if args.no_supervisor {
        let prober = HttpProber::with_defaults()?;
        let outcome = prober.probe(&config.endpoint).await;
        if !outcome.is_healthy() {
            warn!(endpoint = %config.endpoint, outcome = %outcome, "Relay is not healthy");
        }
    } else {
        let launcher = DetachedLauncher::relay(
            resolve_relay_bin(config.relay_bin.as_deref()),
            &config.endpoint,
            config.pid_file.clone(),
        );
        let mut supervisor = Supervisor::new(
            config.endpoint.clone(),
            RestartPolicy::from_config(&config),
            HttpProber::with_defaults()?,
            select_process_probe(),
            launcher,
        );
        if let Err(e) = supervisor.ensure_running().await {
            error!(error = %e, "Could not start the relay");
            return Ok(ExitCode::FAILURE);
        }
    }

    let server = McpServer::new(RelayClient::new(&config.endpoint)?);
    info!("Ready to handle requests");

    tokio::select! {
        result = server.serve(tokio::io::stdin(), tokio::io::stdout()) => result?,
        () = shutdown_signal() => {}
    }
    info!("MCP server stopped");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
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
