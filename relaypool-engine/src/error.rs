//! Error types for the pool engine

use thiserror::Error;

/// Pool engine error types
#[derive(Debug, Error)]
pub enum Error {
    /// A discovery task died before reporting; aborts the refresh cycle
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Invalid probe template: {0}")]
    InvalidProbe(String),

    #[error(transparent)]
    Core(#[from] relaypool_core::Error),
}

/// Result type for pool engine operations
pub type Result<T> = std::result::Result<T, Error>;
