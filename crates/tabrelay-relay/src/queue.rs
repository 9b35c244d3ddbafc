//! Bounded FIFO of commands waiting for the extension to poll.
//!
//! Used when no live connection exists. Commands are handed out once, in
//! arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use tabrelay_core::Message;

/// Default number of commands held before new ones are rejected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command queue full ({capacity} commands)")]
pub struct QueueFull {
    pub capacity: usize,
}

#[derive(Clone)]
pub struct CommandQueue {
    commands: Arc<Mutex<VecDeque<Message>>>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a command; fails when the queue is at capacity.
    pub async fn push(&self, command: Message) -> Result<(), QueueFull> {
        let mut commands = self.commands.lock().await;
        if commands.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        commands.push_back(command);
        debug!(queued = commands.len(), "Command queued for polling");
        Ok(())
    }

    /// Take the oldest command.
    pub async fn pop(&self) -> Option<Message> {
        self.commands.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.commands.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.commands.lock().await.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
