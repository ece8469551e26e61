//! Error types for muster-store.

use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying engine failed (I/O, constraint violation, bad SQL).
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The deadline elapsed waiting for the gate or for the engine.
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// A roster update matched no member row.
    #[error("member not registered: {0}")]
    NotRegistered(String),

    /// The storage handle has been closed.
    #[error("storage is closed")]
    Closed,

    /// A previous operation panicked while holding the connection.
    #[error("storage connection lock poisoned")]
    Poisoned,

    /// The blocking worker running the statement failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is transient and worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
