//! Logging setup shared by the relay, the native host and the MCP front door.
//!
//! Everything goes to stderr: the host and the MCP front door own stdout as
//! a protocol channel.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter from `RUST_LOG`, or `default_filter` when unset or unparsable.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber.
///
/// * `default_filter` -- used when `RUST_LOG` is not set
///   (e.g. `"tabrelay_host=info"`).
/// * `log_json` -- emit one JSON object per line instead of text.
///
/// A second call is a no-op.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    let result = if log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing already initialised");
    }
}
