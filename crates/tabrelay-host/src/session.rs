//! Framed session with the browser extension.
//!
//! One reader processes inbound frames in order; replies go through a bounded
//! queue to a single writer so frames never interleave on stdout.

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use tabrelay_core::Message;
use tabrelay_core::artifacts::is_image_payload;
use tabrelay_core::framing::{FrameReader, FrameWriter};

use crate::control::handle_local;
use crate::state::HostState;

/// Frames buffered between producers and the stdout writer.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The extension closed stdin.
    EndOfStream,
    /// The shutdown flag flipped.
    Shutdown,
    /// Unrecoverable I/O error on stdin.
    ReadFailed,
    /// The writer went away.
    WriterClosed,
}

#[derive(Clone)]
pub struct Session {
    state: HostState,
}

impl Session {
    pub const fn new(state: HostState) -> Self {
        Self { state }
    }

    pub const fn state(&self) -> &HostState {
        &self.state
    }

    /// Process one inbound message and return the reply for the extension.
    pub async fn handle(&self, message: Message) -> Option<Message> {
        let request_id = message.request_id_value().cloned();

        let mut reply = if let Some(reply) = handle_local(&self.state, &message).await {
            reply
        } else if message.is_response() {
            self.forward_response(message).await
        } else if message.action().is_some() || message.method().is_some() {
            self.forward_command(message).await
        } else {
            warn!("Ignoring message with no action");
            Message::failure("Message has no action")
        };

        if let Some(id) = request_id {
            reply.set_request_id(id);
        }
        Some(reply)
    }

    /// A response to a command the relay pushed earlier: keep any screenshot,
    /// hand it to the relay once, and acknowledge.
    async fn forward_response(&self, response: Message) -> Message {
        let mut ack = json!({"success": true, "acknowledged": true});

        if let Some(data) = response.get("data").filter(|d| is_image_payload(d)) {
            let data = data.as_str().unwrap_or_default();
            match self.state.artifacts.save(None, data).await {
                Ok(saved) => ack["filepath"] = json!(saved.filepath),
                Err(e) => warn!(error = %e, "Failed to save screenshot from response"),
            }
        }

        match self.state.client.send_response(&response).await {
            Ok(result) => {
                ack["resolved"] = result.get("resolved").cloned().unwrap_or(Value::Bool(false));
            }
            Err(e) => {
                warn!(error = %e, "Failed to forward response to relay");
                ack["resolved"] = Value::Bool(false);
                ack["error"] = json!(e.to_string());
            }
        }
        Message::from_value(ack).unwrap_or_default()
    }

    async fn forward_command(&self, command: Message) -> Message {
        let action = command.action().unwrap_or("unknown").to_string();
        debug!(action = %action, "Forwarding command to relay");
        match self.state.client.send_command(&command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(action = %action, error = %e, "Relay command failed");
                Message::failure(format!("Relay is not available: {e}"))
            }
        }
    }
}

/// Read frames until EOF, shutdown, or a fatal error.
pub async fn run_reader<R>(
    session: &Session,
    reader: &mut FrameReader<R>,
    outbound: &mpsc::Sender<Message>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = reader.read() => frame,
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };
        let message = match frame {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Extension disconnected");
                return SessionEnd::EndOfStream;
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Skipping unreadable frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from extension");
                return SessionEnd::ReadFailed;
            }
        };

        debug!(
            action = message.action().unwrap_or("-"),
            request_id = message.request_id().as_deref().unwrap_or("-"),
            "Received message"
        );
        if let Some(reply) = session.handle(message).await {
            if outbound.send(reply).await.is_err() {
                return SessionEnd::WriterClosed;
            }
        }
    }
}

/// Drain `outbound` into frames until every sender is gone.
pub async fn run_writer<W>(mut outbound: mpsc::Receiver<Message>, writer: FrameWriter<W>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = writer.write(&message).await {
            error!(error = %e, "Failed to write to extension");
            break;
        }
    }
    debug!("Writer stopped");
}
