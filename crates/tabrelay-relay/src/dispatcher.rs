//! Command dispatch over the live connection or the polling queue.
//!
//! With a live connection the command goes out under a fresh internal id and
//! the caller waits for the correlated response. Without one (or when the
//! send fails) the command is queued for the extension to poll and the caller
//! gets an acknowledgement immediately. Nothing is retried here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use tabrelay_core::Message;
use tabrelay_core::message::REQUEST_ID;
use tabrelay_core::pending::{DEFAULT_REQUEST_TIMEOUT, PendingError, PendingTable};

use crate::queue::{CommandQueue, QueueFull};
use crate::registry::ConnectionRegistry;

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// The extension answered over the live connection.
    Completed(Message),
    /// No live connection; the command waits in the poll queue.
    Queued { request_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error(transparent)]
    Pending(PendingError),

    #[error("Response channel dropped: {0}")]
    ResponseDropped(String),
}

/// Routes commands to the extension and correlates its responses.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    queue: CommandQueue,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: ConnectionRegistry,
        queue: CommandQueue,
        pending: PendingTable,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    pub fn with_defaults(registry: ConnectionRegistry, queue: CommandQueue) -> Self {
        Self::new(registry, queue, PendingTable::new(), DEFAULT_REQUEST_TIMEOUT)
    }

    pub const fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub const fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn mint_id(&self) -> String {
        format!("relay-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Deliver `command` to the extension.
    pub async fn dispatch(&self, command: Message) -> Result<Dispatched, DispatchError> {
        let Some(conn) = self.registry.active().await else {
            return self.enqueue(command).await;
        };

        let internal_id = self.mint_id();
        let original_id = command.request_id_value().cloned();
        let mut outbound = command.clone();
        outbound.set_request_id(internal_id.clone());

        let waiter = self
            .pending
            .register(internal_id.clone())
            .await
            .map_err(DispatchError::Pending)?;

        if conn.send(outbound).await.is_err() {
            waiter.cancel().await;
            warn!(
                connection_id = %conn.id,
                request_id = %internal_id,
                "Live connection closed; falling back to poll queue"
            );
            self.registry.unregister(&conn.id).await;
            return self.enqueue(command).await;
        }
        debug!(
            connection_id = %conn.id,
            request_id = %internal_id,
            action = command.action().unwrap_or("unknown"),
            "Command sent over live connection"
        );

        match waiter.wait(self.request_timeout).await {
            Ok(mut response) => {
                match original_id {
                    Some(id) => response.set_request_id(id),
                    None => {
                        response.remove(REQUEST_ID);
                    }
                }
                Ok(Dispatched::Completed(response))
            }
            Err(PendingError::Timeout(id)) => Err(DispatchError::Timeout(id)),
            Err(PendingError::Dropped(id)) => Err(DispatchError::ResponseDropped(id)),
            Err(e) => Err(DispatchError::Pending(e)),
        }
    }

    async fn enqueue(&self, mut command: Message) -> Result<Dispatched, DispatchError> {
        let request_id = match command.request_id() {
            Some(id) => id,
            None => {
                let id = self.mint_id();
                command.set_request_id(id.clone());
                id
            }
        };
        self.queue.push(command).await?;
        info!(request_id = %request_id, "Command queued for browser poll");
        Ok(Dispatched::Queued { request_id })
    }

    /// Route an inbound response to its waiter. Unknown ids are dropped.
    pub async fn handle_response(&self, response: Message) -> bool {
        let Some(id) = response.request_id() else {
            debug!("Response without requestId dropped");
            return false;
        };
        let resolved = self.pending.resolve(&id, response).await;
        if !resolved {
            debug!(request_id = %id, "No pending request for response");
        }
        resolved
    }

    /// Fail every outstanding wait.
    pub async fn cancel_all(&self) {
        self.pending.cancel_all().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn msg(value: serde_json::Value) -> Message {
        Message::from_value(value).unwrap()
    }

    fn dispatcher(timeout: Duration, capacity: usize) -> Dispatcher {
        Dispatcher::new(
            ConnectionRegistry::new(),
            CommandQueue::new(capacity),
            PendingTable::new(),
            timeout,
        )
    }

    /// Attach a fake extension that answers every command with success.
    async fn attach_echo(dispatcher: &Dispatcher) {
        let (tx, mut rx) = mpsc::channel::<Message>(16);
        dispatcher.registry().register(tx).await;
        let d = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let reply = msg(json!({
                    "requestId": cmd.request_id().unwrap(),
                    "success": true,
                }));
                d.handle_response(reply).await;
            }
        });
    }

    #[tokio::test]
    async fn live_connection_round_trip_restores_caller_id() {
        let d = dispatcher(Duration::from_secs(5), 8);
        attach_echo(&d).await;

        let result = d
            .dispatch(msg(json!({"action": "navigate", "requestId": "7"})))
            .await
            .unwrap();

        assert_eq!(
            result,
            Dispatched::Completed(msg(json!({"requestId": "7", "success": true})))
        );
        assert!(d.pending().is_empty().await);
    }

    #[tokio::test]
    async fn internal_id_is_stripped_when_caller_sent_none() {
        let d = dispatcher(Duration::from_secs(5), 8);
        attach_echo(&d).await;

        let Dispatched::Completed(resp) = d.dispatch(msg(json!({"action": "getTabs"}))).await.unwrap()
        else {
            panic!("expected completion");
        };
        assert!(resp.request_id().is_none());
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let d = dispatcher(Duration::from_millis(20), 8);
        let (tx, _rx) = mpsc::channel::<Message>(16);
        d.registry().register(tx).await;

        let err = d
            .dispatch(msg(json!({"action": "click"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert!(d.pending().is_empty().await);
    }

    #[tokio::test]
    async fn no_connection_queues_command() {
        let d = dispatcher(Duration::from_secs(5), 8);
        let result = d
            .dispatch(msg(json!({"action": "navigate", "requestId": "q1"})))
            .await
            .unwrap();
        assert_eq!(
            result,
            Dispatched::Queued {
                request_id: "q1".into()
            }
        );
        let queued = d.queue().pop().await.unwrap();
        assert_eq!(queued.action(), Some("navigate"));
        assert_eq!(queued.request_id().as_deref(), Some("q1"));
    }

    #[tokio::test]
    async fn queued_command_without_id_gets_one() {
        let d = dispatcher(Duration::from_secs(5), 8);
        let Dispatched::Queued { request_id } =
            d.dispatch(msg(json!({"action": "refresh"}))).await.unwrap()
        else {
            panic!("expected queueing");
        };
        let queued = d.queue().pop().await.unwrap();
        assert_eq!(queued.request_id(), Some(request_id));
    }

    #[tokio::test]
    async fn closed_connection_falls_back_to_queue() {
        let d = dispatcher(Duration::from_secs(5), 8);
        let (tx, rx) = mpsc::channel::<Message>(16);
        d.registry().register(tx).await;
        drop(rx);

        let result = d.dispatch(msg(json!({"action": "hover"}))).await.unwrap();
        assert!(matches!(result, Dispatched::Queued { .. }));
        assert_eq!(d.queue().len().await, 1);
        assert!(d.pending().is_empty().await);
    }

    #[tokio::test]
    async fn full_queue_is_an_error() {
        let d = dispatcher(Duration::from_secs(5), 1);
        d.dispatch(msg(json!({"action": "a"}))).await.unwrap();
        let err = d.dispatch(msg(json!({"action": "b"}))).await.unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull(_)));
    }

    #[tokio::test]
    async fn unknown_response_is_dropped() {
        let d = dispatcher(Duration::from_secs(5), 8);
        assert!(
            !d.handle_response(msg(json!({"requestId": "ghost", "success": true})))
                .await
        );
        assert!(!d.handle_response(msg(json!({"success": true}))).await);
    }

    #[tokio::test]
    async fn concurrent_dispatches_get_their_own_responses() {
        let d = dispatcher(Duration::from_secs(5), 8);
        attach_echo(&d).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let d = d.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("c-{i}");
                let out = d
                    .dispatch(msg(json!({"action": "getValue", "requestId": id})))
                    .await
                    .unwrap();
                (id, out)
            }));
        }
        for h in handles {
            let (id, out) = h.await.unwrap();
            let Dispatched::Completed(resp) = out else {
                panic!("expected completion");
            };
            assert_eq!(resp.request_id(), Some(id));
        }
    }
}
