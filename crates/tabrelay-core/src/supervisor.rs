//! Restart supervisor for the relay process.
//!
//! Probes the relay on a fixed interval, restarts it after consecutive
//! failures, backs off exponentially between restart attempts, and gives up
//! for good once the attempt budget is spent.
//!
//! ```text
//! Idle -> Starting -> Monitoring -> BackingOff -> Starting ...
//!                                       \-> Failed (terminal)
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Endpoint};
use crate::probe::{HealthProbe, ProbeOutcome};
use crate::process::{KillOutcome, Launcher, ProcessError, ProcessProbe};

/// Errors surfaced by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Relay restart budget exhausted after {attempts} attempts")]
    Terminal { attempts: u32 },

    #[error("Failed to spawn relay: {0}")]
    Spawn(#[source] ProcessError),

    #[error("Failed to kill stale relay: {0}")]
    Kill(#[source] ProcessError),
}

/// Restart and backoff tuning.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Duration of one backoff step.
    pub unit: Duration,
    /// Exponential base.
    pub base: u32,
    /// Upper bound on the backoff multiplier.
    pub cap: u32,
    /// Spawns allowed before the supervisor gives up.
    pub max_attempts: u32,
    /// Consecutive bad probes that trigger a restart.
    pub failure_threshold: u32,
    /// Probe interval while monitoring.
    pub health_interval: Duration,
    /// Health polls after a spawn.
    pub startup_polls: u32,
    pub startup_poll_interval: Duration,
    /// Pause between killing a stale listener and spawning.
    pub release_wait: Duration,
    /// Failure-free period after which the attempt counter resets.
    pub stability_window: Duration,
    /// Treat an unconfirmed start as running instead of backing off.
    pub optimistic_start: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            base: 2,
            cap: 60,
            max_attempts: 10,
            failure_threshold: 2,
            health_interval: Duration::from_secs(10),
            startup_polls: 15,
            startup_poll_interval: Duration::from_millis(200),
            release_wait: Duration::from_millis(500),
            stability_window: Duration::from_secs(300),
            optimistic_start: true,
        }
    }
}

impl RestartPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: config.backoff_base,
            max_attempts: config.max_restart_attempts,
            health_interval: config.health_interval,
            ..Self::default()
        }
    }

    /// `unit * min(base^attempts, cap)`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = self
            .base
            .checked_pow(attempts)
            .map_or(self.cap, |f| f.min(self.cap));
        self.unit.saturating_mul(factor)
    }
}

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    Idle,
    Starting,
    Monitoring,
    BackingOff,
    Failed,
}

impl SupervisorPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Monitoring => "monitoring",
            Self::BackingOff => "backing_off",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable supervisor state. Only the supervisor writes it.
#[derive(Debug, Clone)]
pub struct SupervisorState {
    pub phase: SupervisorPhase,
    pub attempts: u32,
    pub last_attempt_at: Option<Instant>,
    /// Most recent probe that was not healthy.
    pub last_failure_at: Option<Instant>,
    pub consecutive_health_failures: u32,
    pub healthy_since: Option<Instant>,
    pub last_outcome: Option<ProbeOutcome>,
    pub running: bool,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            phase: SupervisorPhase::Idle,
            attempts: 0,
            last_attempt_at: None,
            last_failure_at: None,
            consecutive_health_failures: 0,
            healthy_since: None,
            last_outcome: None,
            running: false,
        }
    }
}

/// Read-only snapshot published to other tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub phase: SupervisorPhase,
    pub attempts: u32,
    pub consecutive_health_failures: u32,
    pub running: bool,
}

impl From<&SupervisorState> for SupervisorStatus {
    fn from(state: &SupervisorState) -> Self {
        Self {
            phase: state.phase,
            attempts: state.attempts,
            consecutive_health_failures: state.consecutive_health_failures,
            running: state.running,
        }
    }
}

/// Keeps the relay alive.
pub struct Supervisor<P, K, L: Launcher> {
    endpoint: Endpoint,
    policy: RestartPolicy,
    health: P,
    killer: K,
    launcher: L,
    state: SupervisorState,
    child: Option<L::Handle>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<P, K, L> Supervisor<P, K, L>
where
    P: HealthProbe,
    K: ProcessProbe,
    L: Launcher,
{
    pub fn new(endpoint: Endpoint, policy: RestartPolicy, health: P, killer: K, launcher: L) -> Self {
        let state = SupervisorState::default();
        let (status_tx, _) = watch::channel(SupervisorStatus::from(&state));
        Self {
            endpoint,
            policy,
            health,
            killer,
            launcher,
            state,
            child: None,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Make sure the relay is up, starting it if needed.
    pub async fn ensure_running(&mut self) -> Result<(), SupervisorError> {
        self.check_failed()?;
        let outcome = self.observe().await;
        if outcome.is_healthy() {
            info!(endpoint = %self.endpoint, "Relay already running");
            self.enter_monitoring();
            return Ok(());
        }
        self.start(outcome).await
    }

    /// Run one supervision step and return how long to wait before the next.
    pub async fn tick(&mut self) -> Result<Duration, SupervisorError> {
        self.check_failed()?;
        self.apply_stability_reset(Instant::now());

        match self.state.phase {
            SupervisorPhase::Idle => {
                self.ensure_running().await?;
                Ok(self.policy.health_interval)
            }
            SupervisorPhase::Monitoring => {
                let outcome = self.observe().await;
                if outcome.is_healthy() {
                    self.state.consecutive_health_failures = 0;
                    self.state.healthy_since.get_or_insert_with(Instant::now);
                    self.publish();
                    return Ok(self.policy.health_interval);
                }

                self.state.consecutive_health_failures += 1;
                self.state.healthy_since = None;
                warn!(
                    endpoint = %self.endpoint,
                    outcome = %outcome,
                    failures = self.state.consecutive_health_failures,
                    "Relay health check failed"
                );
                if self.state.consecutive_health_failures < self.policy.failure_threshold {
                    self.publish();
                    return Ok(self.policy.health_interval);
                }
                self.state.running = false;
                self.restart_or_wait(Some(outcome)).await
            }
            SupervisorPhase::Starting | SupervisorPhase::BackingOff => {
                self.restart_or_wait(None).await
            }
            SupervisorPhase::Failed => Err(self.terminal_error()),
        }
    }

    /// Supervise until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(endpoint = %self.endpoint, "Supervisor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.tick().await {
                Ok(delay) => delay,
                Err(e @ SupervisorError::Terminal { .. }) => {
                    error!(error = %e, "Relay supervisor is in terminal state");
                    self.policy.health_interval
                }
                Err(e) => {
                    warn!(error = %e, "Supervisor step failed");
                    self.policy.backoff_delay(self.state.attempts)
                }
            };
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("Supervisor stopped");
    }

    async fn restart_or_wait(
        &mut self,
        observed: Option<ProbeOutcome>,
    ) -> Result<Duration, SupervisorError> {
        self.check_terminal()?;

        let delay = self.policy.backoff_delay(self.state.attempts);
        let elapsed = self
            .state
            .last_attempt_at
            .map_or(delay, |at| at.elapsed());
        if elapsed < delay {
            let remaining = delay - elapsed;
            self.set_phase(SupervisorPhase::BackingOff);
            debug!(
                attempts = self.state.attempts,
                remaining_ms = remaining.as_millis(),
                "Backing off before restart"
            );
            return Ok(remaining);
        }

        let outcome = match observed {
            Some(outcome) => outcome,
            None => {
                let outcome = self.observe().await;
                if outcome.is_healthy() {
                    info!(endpoint = %self.endpoint, "Relay recovered without restart");
                    self.enter_monitoring();
                    return Ok(self.policy.health_interval);
                }
                outcome
            }
        };
        self.start(outcome).await?;
        Ok(self.policy.health_interval)
    }

    async fn start(&mut self, observed: ProbeOutcome) -> Result<(), SupervisorError> {
        self.check_terminal()?;
        self.set_phase(SupervisorPhase::Starting);

        if observed == ProbeOutcome::Unresponsive {
            if let Err(e) = self.kill_stale().await {
                warn!(error = %e, "Proceeding to spawn despite failed kill");
            }
            sleep(self.policy.release_wait).await;
        }
        if let Some(previous) = self.child.take() {
            self.launcher.terminate(previous).await;
        }

        self.state.attempts += 1;
        self.state.last_attempt_at = Some(Instant::now());
        self.state.consecutive_health_failures = 0;
        self.state.healthy_since = None;
        info!(
            endpoint = %self.endpoint,
            attempt = self.state.attempts,
            max_attempts = self.policy.max_attempts,
            "Starting relay"
        );

        match self.launcher.launch() {
            Ok(handle) => self.child = Some(handle),
            Err(e) => {
                self.state.running = false;
                self.set_phase(SupervisorPhase::BackingOff);
                return Err(SupervisorError::Spawn(e));
            }
        }

        for _ in 0..self.policy.startup_polls {
            sleep(self.policy.startup_poll_interval).await;
            if self.observe().await.is_healthy() {
                info!(endpoint = %self.endpoint, "Relay started");
                self.state.attempts = 0;
                self.enter_monitoring();
                return Ok(());
            }
        }

        if self.policy.optimistic_start {
            warn!(endpoint = %self.endpoint, "Relay start unconfirmed; monitoring anyway");
            self.state.running = true;
            self.set_phase(SupervisorPhase::Monitoring);
        } else {
            warn!(endpoint = %self.endpoint, "Relay start unconfirmed; backing off");
            self.state.running = false;
            self.set_phase(SupervisorPhase::BackingOff);
        }
        Ok(())
    }

    async fn kill_stale(&self) -> Result<(), SupervisorError> {
        let outcome = self
            .killer
            .kill_listeners(&self.endpoint)
            .await
            .map_err(SupervisorError::Kill)?;
        match outcome {
            KillOutcome::Killed(pids) => {
                info!(endpoint = %self.endpoint, pids = ?pids, "Killed stale relay");
            }
            KillOutcome::NothingFound => {
                debug!(endpoint = %self.endpoint, "No stale listener found");
            }
            KillOutcome::Unsupported => {
                warn!(
                    endpoint = %self.endpoint,
                    probe = self.killer.name(),
                    "Cannot kill stale listener on this host"
                );
            }
        }
        Ok(())
    }

    async fn observe(&mut self) -> ProbeOutcome {
        let outcome = self.health.probe(&self.endpoint).await;
        self.state.last_outcome = Some(outcome);
        if !outcome.is_healthy() {
            self.state.last_failure_at = Some(Instant::now());
        }
        outcome
    }

    fn apply_stability_reset(&mut self, now: Instant) {
        if self.state.attempts == 0 {
            return;
        }
        let window = self.policy.stability_window;
        // Quiet means no attempt and no failed probe for a whole window.
        let quiet = self.state.last_attempt_at.is_some_and(|at| {
            let since = self.state.last_failure_at.map_or(at, |failed| failed.max(at));
            now.duration_since(since) >= window
        });
        let stable = self
            .state
            .healthy_since
            .is_some_and(|at| now.duration_since(at) >= window);
        if quiet || stable {
            info!(attempts = self.state.attempts, "Relay stable; resetting restart attempts");
            self.state.attempts = 0;
            self.publish();
        }
    }

    fn check_failed(&self) -> Result<(), SupervisorError> {
        if self.state.phase == SupervisorPhase::Failed {
            return Err(self.terminal_error());
        }
        Ok(())
    }

    /// Enter `Failed` when the restart budget is spent.
    fn check_terminal(&mut self) -> Result<(), SupervisorError> {
        self.check_failed()?;
        if self.state.attempts >= self.policy.max_attempts {
            error!(
                attempts = self.state.attempts,
                "Relay failed too many times; giving up"
            );
            self.state.running = false;
            self.set_phase(SupervisorPhase::Failed);
            return Err(self.terminal_error());
        }
        Ok(())
    }

    fn terminal_error(&self) -> SupervisorError {
        SupervisorError::Terminal {
            attempts: self.state.attempts,
        }
    }

    fn enter_monitoring(&mut self) {
        self.state.running = true;
        self.state.consecutive_health_failures = 0;
        self.state.healthy_since.get_or_insert_with(Instant::now);
        self.set_phase(SupervisorPhase::Monitoring);
    }

    fn set_phase(&mut self, phase: SupervisorPhase) {
        if self.state.phase != phase {
            debug!(from = %self.state.phase, to = %phase, "Supervisor phase change");
        }
        self.state.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(SupervisorStatus::from(&self.state));
    }
}
