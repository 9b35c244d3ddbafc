mod connection;

pub use connection::{BrowserConnection, ConnectionRegistry};
