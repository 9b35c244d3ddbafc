//! Pending-request table.
//!
//! Maps an outstanding request id to a one-shot slot. Each entry is resolved
//! exactly once: either by a response or by expiry, never both. A response
//! arriving after expiry finds no entry and is dropped. Dropping a [`Waiter`]
//! without waiting (e.g. a cancelled handler) removes its entry as well.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};

use crate::message::Message;

/// Default bound on how long a caller waits for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the pending-request table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    #[error("Request id already pending: {0}")]
    DuplicateRequestId(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The table was cleared while the caller was waiting.
    #[error("Request cancelled before a response arrived: {0}")]
    Dropped(String),
}

/// An outstanding request.
#[derive(Debug)]
struct PendingRequest {
    token: u64,
    created_at: Instant,
    slot: oneshot::Sender<Message>,
}

type Entries = Arc<RwLock<HashMap<String, PendingRequest>>>;

/// Thread-safe table of outstanding requests.
#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Entries,
    next_token: Arc<AtomicU64>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request id and return the waiter for its response.
    pub async fn register(&self, id: impl Into<String>) -> Result<Waiter, PendingError> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&id) {
                return Err(PendingError::DuplicateRequestId(id));
            }
            entries.insert(
                id.clone(),
                PendingRequest {
                    token,
                    created_at: Instant::now(),
                    slot: tx,
                },
            );
        }
        debug!(request_id = %id, "Registered pending request");
        Ok(Waiter {
            id,
            token,
            rx,
            entries: Arc::clone(&self.entries),
        })
    }

    /// Complete a pending request with its response.
    ///
    /// Returns `false` when the id is unknown, already resolved or expired, or
    /// when the waiter has gone away.
    pub async fn resolve(&self, id: &str, response: Message) -> bool {
        let Some(request) = self.entries.write().await.remove(id) else {
            return false;
        };
        debug!(
            request_id = %id,
            elapsed_ms = request.created_at.elapsed().as_millis(),
            "Resolved pending request"
        );
        request.slot.send(response).is_ok()
    }

    /// Remove a pending request without resolving it.
    ///
    /// Returns `true` if the entry was still present.
    pub async fn expire(&self, id: &str) -> bool {
        expire_entry(&self.entries, id, None).await
    }

    /// Drop every pending request; their waiters observe [`PendingError::Dropped`].
    pub async fn cancel_all(&self) {
        let mut entries = self.entries.write().await;
        if !entries.is_empty() {
            warn!(count = entries.len(), "Cancelling all pending requests");
        }
        entries.clear();
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Remove `id`, but only the registration identified by `token` when given.
fn take_entry(
    entries: &mut HashMap<String, PendingRequest>,
    id: &str,
    token: Option<u64>,
) -> bool {
    let matches = entries
        .get(id)
        .is_some_and(|req| token.is_none_or(|t| t == req.token));
    matches && entries.remove(id).is_some()
}

async fn expire_entry(entries: &Entries, id: &str, token: Option<u64>) -> bool {
    let removed = take_entry(&mut *entries.write().await, id, token);
    if removed {
        debug!(request_id = %id, "Expired pending request");
    }
    removed
}

/// The receiving half of a registered request.
#[derive(Debug)]
pub struct Waiter {
    id: String,
    token: u64,
    rx: oneshot::Receiver<Message>,
    entries: Entries,
}

impl Waiter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait up to `timeout` for the response.
    ///
    /// On timeout the entry is expired. If expiry finds the entry already
    /// gone, a resolve claimed it first and its response is returned instead.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message, PendingError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PendingError::Dropped(self.id.clone())),
            Err(_) => {
                if expire_entry(&self.entries, &self.id, Some(self.token)).await {
                    warn!(request_id = %self.id, timeout_ms = timeout.as_millis(), "Request timed out");
                    return Err(PendingError::Timeout(self.id.clone()));
                }
                // The resolver removed the entry and is about to send.
                (&mut self.rx)
                    .await
                    .map_err(|_| PendingError::Dropped(self.id.clone()))
            }
        }
    }

    /// Give up on the request and remove its entry.
    pub async fn cancel(self) -> bool {
        expire_entry(&self.entries, &self.id, Some(self.token)).await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.entries.try_write() {
            if take_entry(&mut entries, &self.id, Some(self.token)) {
                debug!(request_id = %self.id, "Abandoned pending request");
            }
            return;
        }
        // Lock is busy; finish the removal on the runtime.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let entries = Arc::clone(&self.entries);
        let id = std::mem::take(&mut self.id);
        let token = self.token;
        handle.spawn(async move {
            expire_entry(&entries, &id, Some(token)).await;
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(id: &str) -> Message {
        Message::from_value(json!({"requestId": id, "success": true})).unwrap()
    }

    #[tokio::test]
    async fn register_resolve_wait() {
        let table = PendingTable::new();
        let waiter = table.register("req-1").await.unwrap();
        assert!(table.contains("req-1").await);

        assert!(table.resolve("req-1", response("req-1")).await);
        let got = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.request_id().as_deref(), Some("req-1"));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let table = PendingTable::new();
        let _waiter = table.register("dup").await.unwrap();
        let err = table.register("dup").await.unwrap_err();
        assert_eq!(err, PendingError::DuplicateRequestId("dup".into()));
    }

    #[tokio::test]
    async fn resolve_unknown_returns_false() {
        let table = PendingTable::new();
        assert!(!table.resolve("nope", response("nope")).await);
    }

    #[tokio::test]
    async fn second_resolve_returns_false() {
        let table = PendingTable::new();
        let _waiter = table.register("once").await.unwrap();
        assert!(table.resolve("once", response("once")).await);
        assert!(!table.resolve("once", response("once")).await);
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_noop() {
        let table = PendingTable::new();
        let waiter = table.register("X").await.unwrap();

        let err = waiter.wait(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, PendingError::Timeout("X".into()));
        assert!(!table.contains("X").await);

        assert!(!table.resolve("X", response("X")).await);
    }

    #[tokio::test]
    async fn id_can_be_reused_after_expiry() {
        let table = PendingTable::new();
        let waiter = table.register("r").await.unwrap();
        assert!(waiter.cancel().await);
        assert!(table.register("r").await.is_ok());
    }

    #[tokio::test]
    async fn aborted_wait_releases_entry() {
        let table = PendingTable::new();
        let waiter = table.register("abandoned").await.unwrap();
        let task = tokio::spawn(waiter.wait(Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(table.len().await, 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        for _ in 0..50 {
            if table.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(table.is_empty().await);
        assert!(!table.resolve("abandoned", response("abandoned")).await);
    }

    #[tokio::test]
    async fn stale_waiter_drop_keeps_new_registration() {
        let table = PendingTable::new();
        let stale = table.register("r").await.unwrap();
        assert!(table.expire("r").await);
        let _fresh = table.register("r").await.unwrap();

        drop(stale);
        assert!(table.contains("r").await);
    }

    #[tokio::test]
    async fn cancel_all_drops_waiters() {
        let table = PendingTable::new();
        let waiter = table.register("a").await.unwrap();
        table.cancel_all().await;
        let err = waiter.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, PendingError::Dropped("a".into()));
    }

    #[tokio::test]
    async fn thousand_concurrent_ids_resolve_exactly_once() {
        let table = PendingTable::new();
        let mut ids: Vec<String> = (0..1000).map(|i| format!("id-{i}")).collect();

        let mut waits = Vec::with_capacity(ids.len());
        for id in &ids {
            let waiter = table.register(id.clone()).await.unwrap();
            let expected = id.clone();
            waits.push(tokio::spawn(async move {
                let got = waiter.wait(Duration::from_secs(10)).await.unwrap();
                assert_eq!(got.request_id().as_deref(), Some(expected.as_str()));
            }));
        }

        ids.sort_by_cached_key(|_| rand::random::<u64>());
        let mut resolvers = Vec::with_capacity(ids.len());
        for id in ids.clone() {
            let table = table.clone();
            resolvers.push(tokio::spawn(async move {
                let first = table.resolve(&id, response(&id)).await;
                let second = table.resolve(&id, response(&id)).await;
                (first, second)
            }));
        }

        let mut first_hits = 0;
        for r in resolvers {
            let (first, second) = r.await.unwrap();
            assert!(!second, "no waiter may be resolved twice");
            if first {
                first_hits += 1;
            }
        }
        assert_eq!(first_hits, 1000);

        for w in waits {
            w.await.unwrap();
        }
        assert!(table.is_empty().await);
    }
}
