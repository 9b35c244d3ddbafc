//! `TabRelay` Native Messaging Host
//!
//! Bridges the browser extension's native messaging channel to the relay:
//! - Framed stdin/stdout session with the extension
//! - Local control messages (`ping`, `status`, `saveScreenshot`)
//! - Forwarding of commands and responses to the relay
//! - Polling the relay for queued commands
//! - Keeping the relay process alive

pub mod control;
pub mod poller;
pub mod session;
pub mod state;

pub use session::Session;
pub use state::HostState;
