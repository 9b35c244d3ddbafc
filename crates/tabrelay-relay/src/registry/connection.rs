//! In-memory registry of live browser connections.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use tabrelay_core::Message;

/// A live transport to the browser extension.
///
/// Immutable once registered; a reconnect registers a new connection.
#[derive(Debug)]
pub struct BrowserConnection {
    pub id: String,
    pub connected_at: Instant,
    frame_tx: mpsc::Sender<Message>,
}

impl BrowserConnection {
    pub fn new(frame_tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connected_at: Instant::now(),
            frame_tx,
        }
    }

    /// Push a message to the extension.
    pub async fn send(&self, message: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.frame_tx.send(message).await
    }

    pub fn is_closed(&self) -> bool {
        self.frame_tx.is_closed()
    }
}

/// Thread-safe registry of live browser connections, oldest first.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<Vec<Arc<BrowserConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection backed by `frame_tx`.
    pub async fn register(&self, frame_tx: mpsc::Sender<Message>) -> Arc<BrowserConnection> {
        let conn = Arc::new(BrowserConnection::new(frame_tx));
        self.connections.write().await.push(Arc::clone(&conn));
        info!(connection_id = %conn.id, "Browser connection registered");
        conn
    }

    /// Remove a connection.
    pub async fn unregister(&self, id: &str) -> Option<Arc<BrowserConnection>> {
        let mut connections = self.connections.write().await;
        let Some(pos) = connections.iter().position(|c| c.id == id) else {
            warn!(connection_id = %id, "Tried to unregister unknown connection");
            return None;
        };
        let conn = connections.remove(pos);
        info!(connection_id = %id, "Browser connection unregistered");
        Some(conn)
    }

    /// The most recently registered connection that is still open.
    pub async fn active(&self) -> Option<Arc<BrowserConnection>> {
        self.connections
            .read()
            .await
            .iter()
            .rev()
            .find(|c| !c.is_closed())
            .cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
