//! Error types for muster-election.

use thiserror::Error;

/// Result type for election operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during leader election.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage layer failed or timed out.
    #[error("storage error: {0}")]
    Store(#[from] muster_store::Error),

    /// The coordinator is in an invalid state for the requested operation.
    #[error("invalid election state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// The election configuration was rejected.
    #[error("invalid election config: {0}")]
    InvalidConfig(String),

    /// A bounded acquire loop ran out of attempts.
    #[error("leadership not acquired after {0} attempts")]
    AcquireExhausted(u32),
}
