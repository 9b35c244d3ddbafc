//! Shared relay state and the tool-call flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tabrelay_core::Message;
use tabrelay_core::artifacts::{ArtifactStore, default_filename};
use tabrelay_core::config::default_screenshots_dir;
use tabrelay_core::pending::{DEFAULT_REQUEST_TIMEOUT, PendingTable};

use crate::dispatcher::{Dispatched, Dispatcher};
use crate::queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY};
use crate::registry::ConnectionRegistry;
use crate::tools::{self, SCREENSHOT_ACTION};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a queued screenshot waits for its response before it is forgotten.
pub const QUEUED_SCREENSHOT_TTL: Duration = Duration::from_secs(600);

/// Filename promised to the caller of a queued screenshot.
#[derive(Debug)]
struct QueuedScreenshot {
    filename: String,
    queued_at: Instant,
}

type QueuedScreenshots = HashMap<String, QueuedScreenshot>;

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    pub screenshots_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            screenshots_dir: default_screenshots_dir(),
        }
    }
}

/// Everything the routes share.
#[derive(Clone)]
pub struct RelayState {
    pub registry: ConnectionRegistry,
    pub queue: CommandQueue,
    pub dispatcher: Dispatcher,
    pub artifacts: ArtifactStore,
    /// Queued screenshot request ids awaiting a polled response.
    queued_screenshots: Arc<Mutex<QueuedScreenshots>>,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let queue = CommandQueue::new(config.queue_capacity);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            queue.clone(),
            PendingTable::new(),
            config.request_timeout,
        );
        Self {
            registry,
            queue,
            dispatcher,
            artifacts: ArtifactStore::new(&config.screenshots_dir),
            queued_screenshots: Arc::default(),
        }
    }

    /// Body of `GET /health`.
    pub async fn health(&self) -> Value {
        json!({
            "status": "ok",
            "timestamp": unix_now(),
            "version": VERSION,
            "browsers_connected": self.registry.connection_count().await,
            "queued_commands": self.queue.len().await,
            "pending_requests": self.dispatcher.pending().len().await,
        })
    }

    /// Run a tool: map it to a browser command, dispatch, and post-process
    /// screenshot results.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Value {
        info!(tool = %name, "Executing tool");
        let Some(command) = tools::build_command(name, arguments) else {
            return Message::failure(format!("Unknown tool: {name}")).into_value();
        };
        let action = command.action().unwrap_or_default().to_string();
        let is_screenshot = action == SCREENSHOT_ACTION;

        match self.dispatcher.dispatch(command).await {
            Ok(Dispatched::Completed(result)) => {
                if is_screenshot && save_requested(arguments) && has_image_data(&result) {
                    return self.save_screenshot(result, arguments).await;
                }
                result.into_value()
            }
            Ok(Dispatched::Queued { request_id }) => {
                if is_screenshot {
                    return self.queued_screenshot(request_id, arguments).await;
                }
                json!({
                    "success": true,
                    "queued": true,
                    "message": format!("Command {action} queued for browser"),
                    "action": action,
                    "requestId": request_id,
                })
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool dispatch failed");
                Message::failure(e).into_value()
            }
        }
    }

    async fn save_screenshot(&self, result: Message, arguments: &Value) -> Value {
        let data = result.get_str("data").unwrap_or_default();
        match self.artifacts.save(requested_filename(arguments), data).await {
            Ok(saved) => json!({
                "success": true,
                "filepath": saved.filepath,
                "filename": saved.filename,
                "size": saved.size,
                "tab": result.get("tab").cloned().unwrap_or_else(|| json!({})),
                "message": format!("Screenshot saved to {}", saved.filepath.display()),
            }),
            Err(e) => {
                warn!(error = %e, "Failed to save screenshot");
                json!({
                    "success": false,
                    "error": format!("Failed to save screenshot: {e}"),
                    "original_result": result,
                })
            }
        }
    }

    async fn queued_screenshot(&self, request_id: String, arguments: &Value) -> Value {
        let filename = requested_filename(arguments).map_or_else(default_filename, str::to_string);
        let save_path = match self.artifacts.path_for(&filename) {
            Ok(path) => path,
            Err(e) => return Message::failure(e).into_value(),
        };
        if save_requested(arguments) {
            let now = Instant::now();
            let mut queued = self.queued_screenshots.lock().await;
            prune_queued_screenshots(&mut queued, now, QUEUED_SCREENSHOT_TTL);
            queued.insert(
                request_id.clone(),
                QueuedScreenshot {
                    filename,
                    queued_at: now,
                },
            );
        }
        json!({
            "success": true,
            "queued": true,
            "message": "Screenshot command queued",
            "save_path": save_path,
            "screenshots_dir": self.artifacts.dir(),
            "action": SCREENSHOT_ACTION,
            "requestId": request_id,
            "note": "Screenshot will be saved when the browser extension responds",
        })
    }

    /// Handle `POST /browser/response`: wake the waiter, or save the payload
    /// of a screenshot that was queued for polling.
    pub async fn accept_response(&self, response: Message) -> bool {
        let request_id = response.request_id();
        let screenshot_file = match &request_id {
            Some(id) => self
                .queued_screenshots
                .lock()
                .await
                .remove(id)
                .filter(|q| q.queued_at.elapsed() < QUEUED_SCREENSHOT_TTL)
                .map(|q| q.filename),
            None => None,
        };
        if let Some(filename) = screenshot_file {
            if has_image_data(&response) {
                let data = response.get_str("data").unwrap_or_default();
                if let Err(e) = self.artifacts.save(Some(&filename), data).await {
                    warn!(filename = %filename, error = %e, "Failed to save queued screenshot");
                }
            }
        }
        self.dispatcher.handle_response(response).await
    }

    /// Queued screenshots still waiting for a response.
    pub async fn queued_screenshot_count(&self) -> usize {
        self.queued_screenshots.lock().await.len()
    }

    /// Fail all outstanding waits; used on shutdown.
    pub async fn shutdown(&self) {
        self.dispatcher.cancel_all().await;
    }
}

fn prune_queued_screenshots(queued: &mut QueuedScreenshots, now: Instant, ttl: Duration) {
    let before = queued.len();
    queued.retain(|_, q| now.duration_since(q.queued_at) < ttl);
    let dropped = before - queued.len();
    if dropped > 0 {
        debug!(dropped, "Forgot unanswered queued screenshots");
    }
}

fn save_requested(arguments: &Value) -> bool {
    arguments
        .get("save_to_file")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn requested_filename(arguments: &Value) -> Option<&str> {
    arguments
        .get("filename")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn has_image_data(result: &Message) -> bool {
    result.is_success() && result.get_str("data").is_some_and(|d| !d.is_empty())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
