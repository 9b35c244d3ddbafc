//! Configuration resolution for `TabRelay`.
//!
//! Implements a two-level resolution:
//! 1. Built-in defaults
//! 2. Environment variables (`TABRELAY_*`)
//!
//! Binaries layer CLI arguments on top through `clap`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_HOST: &str = "TABRELAY_HOST";
pub const ENV_PORT: &str = "TABRELAY_PORT";
pub const ENV_SCREENSHOTS_DIR: &str = "TABRELAY_SCREENSHOTS_DIR";
pub const ENV_HEALTH_INTERVAL: &str = "TABRELAY_HEALTH_INTERVAL_SECS";
pub const ENV_MAX_RESTART_ATTEMPTS: &str = "TABRELAY_MAX_RESTART_ATTEMPTS";
pub const ENV_BACKOFF_BASE: &str = "TABRELAY_BACKOFF_BASE";
pub const ENV_RELAY_BIN: &str = "TABRELAY_RELAY_BIN";
pub const ENV_PID_FILE: &str = "TABRELAY_PID_FILE";

/// Network address of the relay. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the relay's HTTP surface.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `host:port` form accepted by socket connect calls.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 8765)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Complete `TabRelay` configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub screenshots_dir: PathBuf,
    pub health_interval: Duration,
    pub max_restart_attempts: u32,
    pub backoff_base: u32,
    /// Relay executable the supervisor launches.
    pub relay_bin: Option<PathBuf>,
    /// Where the supervisor records the spawned relay's PID.
    pub pid_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            screenshots_dir: default_screenshots_dir(),
            health_interval: Duration::from_secs(10),
            max_restart_attempts: 10,
            backoff_base: 2,
            relay_bin: None,
            pid_file: None,
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        apply_env_overrides(&mut config, lookup)?;
        Ok(config)
    }
}

/// Default screenshots directory: `<tmp>/tabrelay/screenshots`.
pub fn default_screenshots_dir() -> PathBuf {
    std::env::temp_dir().join("tabrelay").join("screenshots")
}

fn parse<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {key}: {val:?}")))
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(val) = lookup(ENV_HOST) {
        config.endpoint.host = val;
    }
    if let Some(val) = lookup(ENV_PORT) {
        config.endpoint.port = parse(ENV_PORT, &val)?;
    }
    if let Some(val) = lookup(ENV_SCREENSHOTS_DIR) {
        config.screenshots_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup(ENV_HEALTH_INTERVAL) {
        let secs: u64 = parse(ENV_HEALTH_INTERVAL, &val)?;
        if secs == 0 {
            return Err(Error::Config(format!("{ENV_HEALTH_INTERVAL} must be positive")));
        }
        config.health_interval = Duration::from_secs(secs);
    }
    if let Some(val) = lookup(ENV_MAX_RESTART_ATTEMPTS) {
        config.max_restart_attempts = parse(ENV_MAX_RESTART_ATTEMPTS, &val)?;
    }
    if let Some(val) = lookup(ENV_BACKOFF_BASE) {
        let base: u32 = parse(ENV_BACKOFF_BASE, &val)?;
        if base < 1 {
            return Err(Error::Config(format!("{ENV_BACKOFF_BASE} must be at least 1")));
        }
        config.backoff_base = base;
    }
    if let Some(val) = lookup(ENV_RELAY_BIN) {
        config.relay_bin = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup(ENV_PID_FILE) {
        config.pid_file = Some(PathBuf::from(val));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoint, Endpoint::new("127.0.0.1", 8765));
        assert_eq!(config.health_interval, Duration::from_secs(10));
        assert_eq!(config.max_restart_attempts, 10);
        assert_eq!(config.backoff_base, 2);
        assert!(config.screenshots_dir.ends_with("tabrelay/screenshots"));
    }

    #[test]
    fn env_overrides_apply() {
        let config = Config::from_lookup(lookup(&[
            (ENV_HOST, "localhost"),
            (ENV_PORT, "9000"),
            (ENV_SCREENSHOTS_DIR, "/srv/shots"),
            (ENV_HEALTH_INTERVAL, "3"),
            (ENV_MAX_RESTART_ATTEMPTS, "4"),
            (ENV_BACKOFF_BASE, "3"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint.base_url(), "http://localhost:9000");
        assert_eq!(config.screenshots_dir, PathBuf::from("/srv/shots"));
        assert_eq!(config.health_interval, Duration::from_secs(3));
        assert_eq!(config.max_restart_attempts, 4);
        assert_eq!(config.backoff_base, 3);
    }

    #[test]
    fn invalid_port_is_config_error() {
        let err = Config::from_lookup(lookup(&[(ENV_PORT, "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(Config::from_lookup(lookup(&[(ENV_HEALTH_INTERVAL, "0")])).is_err());
    }
}
