//! Error types for `TabRelay` core library.

use thiserror::Error;

/// Result type alias using `TabRelay` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `TabRelay` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Artifact (screenshot) persistence error
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
