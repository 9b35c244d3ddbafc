//! Control messages the host answers without the relay.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::{debug, warn};

use tabrelay_core::Message;

use crate::state::{HostState, VERSION};

pub const PING: &str = "ping";
pub const STATUS: &str = "status";
pub const SAVE_SCREENSHOT: &str = "saveScreenshot";

/// Answer `message` locally if it is a control message.
pub async fn handle_local(state: &HostState, message: &Message) -> Option<Message> {
    let reply = match message.action()? {
        PING => json!({"success": true, "pong": true, "timestamp": unix_now()}),
        STATUS => status(state).await,
        SAVE_SCREENSHOT => save_screenshot(state, message).await,
        _ => return None,
    };
    Message::from_value(reply)
}

async fn status(state: &HostState) -> Value {
    let available = match state.client.health().await {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "Relay health check failed");
            false
        }
    };
    json!({
        "success": true,
        "relay": {
            "url": state.client.base_url(),
            "available": available,
        },
        "supervisor": state.supervisor_status(),
        "native_host": {
            "version": VERSION,
            "pid": std::process::id(),
            "uptime_secs": state.started_at.elapsed().as_secs(),
        },
    })
}

async fn save_screenshot(state: &HostState, message: &Message) -> Value {
    let data = message.get_str("data").unwrap_or_default();
    let filename = message.get_str("filename");
    match state.artifacts.save(filename, data).await {
        Ok(saved) => json!({"success": true, "filepath": saved.filepath}),
        Err(e) => {
            warn!(error = %e, "saveScreenshot failed");
            Message::failure(e).into_value()
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tabrelay_core::Endpoint;
    use tabrelay_core::artifacts::ArtifactStore;
    use tabrelay_core::supervisor::{SupervisorPhase, SupervisorStatus};
    use tokio::sync::watch;

    fn state(dir: &std::path::Path) -> HostState {
        let (_tx, rx) = watch::channel(SupervisorStatus {
            phase: SupervisorPhase::BackingOff,
            attempts: 3,
            consecutive_health_failures: 0,
            running: false,
        });
        // Port 9 (discard) is not expected to serve HTTP.
        HostState::new(Endpoint::new("127.0.0.1", 9), ArtifactStore::new(dir), rx).unwrap()
    }

    #[tokio::test]
    async fn ping_pongs() {
        let dir = tempfile::tempdir().unwrap();
        let reply = handle_local(&state(dir.path()), &Message::with_action("ping"))
            .await
            .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.get("pong"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn status_reports_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let reply = handle_local(&state(dir.path()), &Message::with_action("status"))
            .await
            .unwrap();
        let value = reply.into_value();
        assert_eq!(value["relay"]["available"], false);
        assert_eq!(value["supervisor"]["phase"], "backing_off");
        assert_eq!(value["supervisor"]["attempts"], 3);
    }

    #[tokio::test]
    async fn save_screenshot_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut msg = Message::with_action("saveScreenshot");
        msg.insert("data", json!("data:image/png;base64,iVBORw0KGgpmYWtl"));
        msg.insert("filename", json!("x.png"));

        let reply = handle_local(&state(dir.path()), &msg).await.unwrap();
        assert!(reply.is_success());
        assert!(dir.path().join("x.png").exists());
    }

    #[tokio::test]
    async fn save_screenshot_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut msg = Message::with_action("saveScreenshot");
        msg.insert("data", json!("%%%"));
        let reply = handle_local(&state(dir.path()), &msg).await.unwrap();
        assert!(!reply.is_success());
        assert!(reply.get_str("error").is_some());
    }

    #[tokio::test]
    async fn other_actions_are_not_local() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            handle_local(&state(dir.path()), &Message::with_action("navigate"))
                .await
                .is_none()
        );
    }
}
