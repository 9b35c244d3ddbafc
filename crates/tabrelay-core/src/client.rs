//! HTTP client for the relay's surface.

use std::time::Duration;

use serde_json::{Value, json};

use crate::config::Endpoint;
use crate::message::Message;

/// Timeout for command-style calls; matches the relay's per-request bound
/// plus headroom for the HTTP round-trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(35);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from relay HTTP calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Relay connection failed: {0}")]
    Connection(String),

    #[error("Relay request timed out: {0}")]
    Timeout(String),

    #[error("Relay returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid relay response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Client for the relay HTTP API.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

/// Build a proxy-free HTTP client for loopback traffic.
pub fn build_http_client() -> Result<reqwest::Client, ClientError> {
    // reqwest is built with `rustls-no-provider`.
    let _ = rustls::crypto::ring::default_provider().install_default();
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(|e| ClientError::Connection(e.to_string()))
}

impl RelayClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self, ClientError> {
        let http = build_http_client()?;
        Ok(Self {
            http,
            base_url: endpoint.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<Value, ClientError> {
        self.get_json("/health", RESPONSE_TIMEOUT).await
    }

    /// `POST /browser/command` — hand a command to the relay's dispatcher.
    pub async fn send_command(&self, command: &Message) -> Result<Message, ClientError> {
        let value = self
            .post_json("/browser/command", command, COMMAND_TIMEOUT)
            .await?;
        into_message(value)
    }

    /// `POST /browser/response` — deliver an extension response for correlation.
    pub async fn send_response(&self, response: &Message) -> Result<Message, ClientError> {
        let value = self
            .post_json("/browser/response", response, RESPONSE_TIMEOUT)
            .await?;
        into_message(value)
    }

    /// `GET /browser/poll` — take the next queued command, if any.
    pub async fn poll(&self) -> Result<Option<Message>, ClientError> {
        let value = self.get_json("/browser/poll", POLL_TIMEOUT).await?;
        match value.get("command") {
            None | Some(Value::Null) => Ok(None),
            Some(cmd) => Message::from_value(cmd.clone())
                .map(Some)
                .ok_or_else(|| ClientError::InvalidResponse("command is not an object".into())),
        }
    }

    /// `GET /mcp/tools`
    pub async fn list_tools(&self) -> Result<Vec<Value>, ClientError> {
        let value = self.get_json("/mcp/tools", RESPONSE_TIMEOUT).await?;
        Ok(value
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// `POST /mcp/call`
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.post_json(
            "/mcp/call",
            &json!({"name": name, "arguments": arguments}),
            COMMAND_TIMEOUT,
        )
        .await
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, ClientError> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

fn into_message(value: Value) -> Result<Message, ClientError> {
    Message::from_value(value)
        .ok_or_else(|| ClientError::InvalidResponse("expected a JSON object".into()))
}
