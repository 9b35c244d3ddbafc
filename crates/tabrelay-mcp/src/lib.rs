//! `TabRelay` MCP front door
//!
//! Speaks newline-delimited JSON-RPC 2.0 on stdio and answers tool requests
//! through the relay's HTTP surface.

pub mod jsonrpc;
pub mod server;

pub use server::{McpServer, ToolBackend};
