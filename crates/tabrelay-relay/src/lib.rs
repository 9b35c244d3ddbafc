//! `TabRelay` Relay Server Library
//!
//! Core functionality for the relay:
//! - Registry of live browser connections (WebSocket)
//! - Bounded queue of commands waiting for the extension to poll
//! - Command dispatch over either transport, with response correlation
//! - Tool catalog and tool-to-action mapping
//! - HTTP and WebSocket routes

pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod state;
pub mod tools;
pub mod ws;

pub use dispatcher::{DispatchError, Dispatched, Dispatcher};
pub use routes::build_router;
pub use state::{RelayConfig, RelayState};
