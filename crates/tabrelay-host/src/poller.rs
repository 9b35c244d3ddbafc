//! Pulls commands the relay queued for the extension.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use tabrelay_core::Message;
use tabrelay_core::client::RelayClient;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Consecutive failures before the poller warns.
const WARN_AFTER_FAILURES: u32 = 3;

/// Poll `GET /browser/poll` every `interval` and push commands to the writer.
pub async fn run_poller(
    client: RelayClient,
    outbound: mpsc::Sender<Message>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0u32;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match client.poll().await {
            Ok(Some(command)) => {
                failures = 0;
                info!(
                    action = command.action().unwrap_or("unknown"),
                    "Forwarding queued command to extension"
                );
                if outbound.send(command).await.is_err() {
                    debug!("Writer closed; poller stopping");
                    break;
                }
                // Drain back-to-back commands without waiting.
                continue;
            }
            Ok(None) => failures = 0,
            Err(e) => {
                failures += 1;
                if failures == WARN_AFTER_FAILURES {
                    warn!(error = %e, "Relay not answering polls; supervisor will handle it");
                } else {
                    debug!(error = %e, failures, "Poll failed");
                }
            }
        }
        tokio::select! {
            () = sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
    debug!("Poller stopped");
}
