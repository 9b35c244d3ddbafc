//! Process capabilities used by the supervisor.
//!
//! - [`ProcessProbe`] finds and kills whatever is bound to the relay port.
//!   Two implementations exist: [`OsProcessProbe`] (uses `lsof`/`ss`) and
//!   [`SocketProcessProbe`] (can only tell the port is taken). Without a way
//!   to discover processes the supervisor degrades to bind-and-fail.
//! - [`Launcher`] spawns the relay as a detached child.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::probe::is_port_in_use;

/// Default relay executable name.
pub const RELAY_BIN_NAME: &str = "tabrelay-relay";

/// Errors from process discovery, kill, and spawn.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to run {program}: {reason}")]
    Discovery { program: String, reason: String },
}

/// What a kill attempt achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// These PIDs were sent `SIGKILL`.
    Killed(Vec<u32>),
    /// Discovery ran but found nothing bound to the port.
    NothingFound,
    /// No way to discover or kill the listener on this host.
    Unsupported,
}

/// Finds and kills processes bound to a port.
pub trait ProcessProbe: Send + Sync {
    fn name(&self) -> &'static str;

    fn kill_listeners(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<KillOutcome, ProcessError>> + Send;
}

/// Listener discovery through `lsof -sTCP:LISTEN`, falling back to `ss -ltnp`.
///
/// Only sockets in the LISTEN state count; clients connected to the port
/// (the browser's `/ws` link, other front doors) are never touched.
#[derive(Debug, Clone, Default)]
pub struct OsProcessProbe;

impl OsProcessProbe {
    /// Stdout of a discovery tool, or `None` when it is not installed.
    async fn run_discovery(program: &str, args: &[String]) -> Result<Option<String>, ProcessError> {
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProcessError::Discovery {
                program: program.into(),
                reason: e.to_string(),
            }),
        }
    }

    async fn listeners_via_lsof(port: u16) -> Result<Option<Vec<u32>>, ProcessError> {
        let args = [
            "-nP".to_string(),
            "-t".to_string(),
            format!("-iTCP:{port}"),
            "-sTCP:LISTEN".to_string(),
        ];
        Ok(Self::run_discovery("lsof", &args)
            .await?
            .map(|out| parse_lsof_pids(&out)))
    }

    async fn listeners_via_ss(port: u16) -> Result<Option<Vec<u32>>, ProcessError> {
        let args = [
            "-H".to_string(),
            "-ltnp".to_string(),
            format!("sport = :{port}"),
        ];
        Ok(Self::run_discovery("ss", &args)
            .await?
            .map(|out| parse_ss_pids(&out)))
    }
}

impl ProcessProbe for OsProcessProbe {
    fn name(&self) -> &'static str {
        "os"
    }

    async fn kill_listeners(&self, endpoint: &Endpoint) -> Result<KillOutcome, ProcessError> {
        let port = endpoint.port;
        let pids = match Self::listeners_via_lsof(port).await? {
            Some(pids) => pids,
            None => match Self::listeners_via_ss(port).await? {
                Some(pids) => pids,
                None => {
                    warn!("Neither lsof nor ss available to kill stale relay");
                    return Ok(KillOutcome::Unsupported);
                }
            },
        };

        let own_pid = std::process::id();
        let pids: Vec<u32> = pids.into_iter().filter(|pid| *pid != own_pid).collect();
        if pids.is_empty() {
            return Ok(KillOutcome::NothingFound);
        }

        let mut killed = Vec::with_capacity(pids.len());
        for pid in pids {
            info!(port, pid, "Killing process listening on relay port");
            if send_sigkill(pid) {
                killed.push(pid);
            }
        }
        Ok(KillOutcome::Killed(killed))
    }
}

/// One PID per line, as printed by `lsof -t`.
fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// `pid=N` entries from the `users:((...))` column of `ss -p`.
fn parse_ss_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .split("pid=")
        .skip(1)
        .filter_map(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Socket-only fallback: detects an occupied port but cannot free it.
#[derive(Debug, Clone)]
pub struct SocketProcessProbe {
    pub connect_timeout: Duration,
}

impl Default for SocketProcessProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ProcessProbe for SocketProcessProbe {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn kill_listeners(&self, endpoint: &Endpoint) -> Result<KillOutcome, ProcessError> {
        if is_port_in_use(endpoint, self.connect_timeout).await {
            warn!(
                endpoint = %endpoint,
                "Port is occupied but no process discovery is available; the relay bind will fail"
            );
            Ok(KillOutcome::Unsupported)
        } else {
            Ok(KillOutcome::NothingFound)
        }
    }
}

/// The process probe chosen for this host.
#[derive(Debug, Clone)]
pub enum HostProcessProbe {
    Os(OsProcessProbe),
    Socket(SocketProcessProbe),
}

impl ProcessProbe for HostProcessProbe {
    fn name(&self) -> &'static str {
        match self {
            Self::Os(p) => p.name(),
            Self::Socket(p) => p.name(),
        }
    }

    async fn kill_listeners(&self, endpoint: &Endpoint) -> Result<KillOutcome, ProcessError> {
        match self {
            Self::Os(p) => p.kill_listeners(endpoint).await,
            Self::Socket(p) => p.kill_listeners(endpoint).await,
        }
    }
}

/// Pick the OS adapter when `lsof` or `ss` is installed, else the socket fallback.
pub fn select_process_probe() -> HostProcessProbe {
    if cfg!(unix) && (command_exists("lsof") || command_exists("ss")) {
        debug!("Using OS process discovery");
        HostProcessProbe::Os(OsProcessProbe)
    } else {
        warn!("No process discovery tool found; stale relays cannot be killed");
        HostProcessProbe::Socket(SocketProcessProbe::default())
    }
}

/// Check whether a program exists on PATH.
pub fn command_exists(program: &str) -> bool {
    std::process::Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(unix)]
fn send_sigkill(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; an invalid pid just
    // yields ESRCH.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        warn!(pid, error = %err, "Failed to send SIGKILL");
        return false;
    }
    true
}

#[cfg(not(unix))]
fn send_sigkill(pid: u32) -> bool {
    warn!(pid, "SIGKILL unsupported on this platform");
    false
}

/// Spawns the relay process.
pub trait Launcher: Send + Sync {
    /// Owned handle to a spawned process.
    type Handle: Send;

    fn launch(&self) -> Result<Self::Handle, ProcessError>;

    /// Kill and reap a previously launched process.
    fn terminate(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}

/// Launches the relay binary detached from the caller: own process group,
/// stdio discarded.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub pid_file: Option<PathBuf>,
}

impl DetachedLauncher {
    /// Launcher for the relay bound to `endpoint`.
    pub fn relay(program: PathBuf, endpoint: &Endpoint, pid_file: Option<PathBuf>) -> Self {
        Self {
            program,
            args: vec!["--addr".into(), endpoint.authority()],
            pid_file,
        }
    }

    fn write_pid_file(&self, pid: u32) {
        let Some(path) = &self.pid_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, pid.to_string()) {
            debug!(path = %path.display(), error = %e, "Failed to write PID file");
        }
    }
}

impl Launcher for DetachedLauncher {
    type Handle = Child;

    fn launch(&self) -> Result<Child, ProcessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: self.program.display().to_string(),
            reason: e.to_string(),
        })?;
        if let Some(pid) = child.id() {
            info!(pid, program = %self.program.display(), "Spawned relay process");
            self.write_pid_file(pid);
        }
        Ok(child)
    }

    async fn terminate(&self, mut handle: Child) {
        if let Err(e) = handle.kill().await {
            debug!(error = %e, "Previous relay child already gone");
        }
    }
}

/// Resolve the relay executable: explicit override, then a sibling of the
/// current executable, then `PATH`.
pub fn resolve_relay_bin(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(RELAY_BIN_NAME)));
    match sibling {
        Some(path) if path.exists() => path,
        _ => PathBuf::from(RELAY_BIN_NAME),
    }
}
