//! `TabRelay` Native Messaging Host
//!
//! Launched by the browser. stdin/stdout carry length-prefixed JSON frames,
//! so all logging goes to stderr.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use tabrelay_core::Config;
use tabrelay_core::artifacts::ArtifactStore;
use tabrelay_core::framing::{FrameReader, FrameWriter};
use tabrelay_core::probe::{HealthProbe, HttpProber};
use tabrelay_core::process::{DetachedLauncher, resolve_relay_bin, select_process_probe};
use tabrelay_core::supervisor::{RestartPolicy, Supervisor};
use tabrelay_core::tracing_init::init_tracing;
use tabrelay_host::poller::{POLL_INTERVAL, run_poller};
use tabrelay_host::session::{OUTBOUND_CAPACITY, SessionEnd, run_reader, run_writer};
use tabrelay_host::{HostState, Session};

/// How long background tasks get to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tabrelay-host")]
#[command(version, about = "TabRelay native messaging host")]
struct Args {
    /// Probe the relay once and exit 0 if it is healthy, 1 otherwise.
    #[arg(long)]
    check: bool,

    /// Do not start or supervise the relay process.
    #[arg(long, env = "TABRELAY_NO_SUPERVISOR")]
    no_supervisor: bool,

    /// Emit JSON log lines.
    #[arg(long, env = "TABRELAY_LOG_JSON")]
    log_json: bool,

    /// Browsers pass the extension origin as a positional argument.
    #[arg(hide = true)]
    origin: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing("tabrelay_host=info,tabrelay_core=info", args.log_json);

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
            error!(error = %e, "Native host failed");
            ExitCode::FAILURE
        }
    };
    // A blocking stdin read may still be parked in the pool.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    let prober = HttpProber::with_defaults()?;

    if args.check {
        let outcome = prober.probe(&config.endpoint).await;
        info!(endpoint = %config.endpoint, outcome = %outcome, "Liveness check");
        return Ok(if outcome.is_healthy() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    info!(
        endpoint = %config.endpoint,
        origin = args.origin.as_deref().unwrap_or("-"),
        pid = std::process::id(),
        "Native host starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let launcher = DetachedLauncher::relay(
        resolve_relay_bin(config.relay_bin.as_deref()),
        &config.endpoint,
        config.pid_file.clone(),
    );
    let mut supervisor = Supervisor::new(
        config.endpoint.clone(),
        RestartPolicy::from_config(&config),
        prober,
        select_process_probe(),
        launcher,
    );
    let status_rx = supervisor.subscribe();
    let supervisor_task = if args.no_supervisor {
        None
    } else {
        if let Err(e) = supervisor.ensure_running().await {
            warn!(error = %e, "Relay not running at startup");
        }
        Some(tokio::spawn(supervisor.run(shutdown_rx.clone())))
    };

    let state = HostState::new(
        config.endpoint.clone(),
        ArtifactStore::new(&config.screenshots_dir),
        status_rx,
    )?;
    let session = Session::new(state.clone());

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(run_writer(out_rx, FrameWriter::new(tokio::io::stdout())));
    let poller_task = tokio::spawn(run_poller(
        state.client.clone(),
        out_tx.clone(),
        POLL_INTERVAL,
        shutdown_rx.clone(),
    ));

    let mut reader = FrameReader::new(tokio::io::stdin());
    let mut reader_shutdown = shutdown_rx.clone();
    let end = tokio::select! {
        end = run_reader(&session, &mut reader, &out_tx, &mut reader_shutdown) => end,
        () = shutdown_signal() => SessionEnd::Shutdown,
    };
    info!(reason = ?end, "Session ended");

    let _ = shutdown_tx.send(true);
    drop(out_tx);
    let mut tasks = vec![("poller", poller_task)];
    if let Some(task) = supervisor_task {
        tasks.push(("supervisor", task));
    }
    for (name, task) in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!(task = name, "Task did not stop in time");
        }
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, writer_task).await.is_err() {
        warn!("Writer did not drain in time");
    }

    if end == SessionEnd::ReadFailed {
        error!("Native host exiting after read failure");
        return Ok(ExitCode::FAILURE);
    }
    info!("Native host stopped");
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
