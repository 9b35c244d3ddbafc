//! Relay liveness probing.
//!
//! A probe distinguishes "nothing is listening" from "something is listening
//! but not answering correctly". The supervisor relies on that distinction: a
//! stale listener has to be killed before a fresh relay can bind the port.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::{ClientError, build_http_client};
use crate::config::Endpoint;

/// Value of `status` in a healthy `/health` payload.
pub const HEALTH_MARKER: &str = "ok";

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The liveness check returned the expected marker.
    Healthy,
    /// The TCP connection attempt failed.
    Unreachable,
    /// TCP connects but the liveness check fails, times out or returns
    /// something unexpected.
    Unresponsive,
}

impl ProbeOutcome {
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unreachable => "unreachable",
            Self::Unresponsive => "unresponsive",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can check an endpoint's health.
pub trait HealthProbe: Send + Sync {
    fn probe(&self, endpoint: &Endpoint) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Timeouts for [`HttpProber`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on the `GET /health` round-trip.
    pub check_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            check_timeout: Duration::from_secs(3),
        }
    }
}

/// TCP reachability followed by `GET /health`.
#[derive(Clone)]
pub struct HttpProber {
    http: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client()?,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self, ClientError> {
        Self::new(ProbeConfig::default())
    }

    /// Whether anything accepts TCP connections on the endpoint.
    pub async fn port_in_use(&self, endpoint: &Endpoint) -> bool {
        is_port_in_use(endpoint, self.config.connect_timeout).await
    }

    async fn check_health(&self, endpoint: &Endpoint) -> ProbeOutcome {
        let url = format!("{}/health", endpoint.base_url());
        let result = self
            .http
            .get(&url)
            .timeout(self.config.check_timeout)
            .send()
            .await;
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Health request failed");
                return ProbeOutcome::Unresponsive;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            debug!(endpoint = %endpoint, status = %status, "Health check returned error status");
            return ProbeOutcome::Unresponsive;
        }
        match resp.json::<Value>().await {
            Ok(body) if is_healthy_body(&body) => ProbeOutcome::Healthy,
            Ok(body) => {
                debug!(endpoint = %endpoint, body = %body, "Health body missing marker");
                ProbeOutcome::Unresponsive
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Health body is not JSON");
                ProbeOutcome::Unresponsive
            }
        }
    }
}

/// `true` for a health payload whose `status` field is the marker.
pub fn is_healthy_body(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some(HEALTH_MARKER)
}

impl HealthProbe for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome {
        if !self.port_in_use(endpoint).await {
            return ProbeOutcome::Unreachable;
        }
        self.check_health(endpoint).await
    }
}

/// TCP connect with a bound; `true` when the connection is accepted.
pub async fn is_port_in_use(endpoint: &Endpoint, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(endpoint.authority())).await,
        Ok(Ok(_))
    )
}
