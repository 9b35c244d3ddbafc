//! `TabRelay` Core Library
//!
//! Shared functionality for `TabRelay` components:
//! - Length-prefixed JSON framing for the native messaging channel
//! - Request correlation (pending-request table)
//! - Relay HTTP client and health probing
//! - Relay process supervision with backoff
//! - Configuration resolution and common error types

pub mod artifacts;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod message;
pub mod pending;
pub mod probe;
pub mod process;
pub mod supervisor;
pub mod tracing_init;

pub use config::{Config, Endpoint};
pub use error::{Error, Result};
pub use message::Message;
