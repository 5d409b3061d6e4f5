//! Error types for replica-netcode

use thiserror::Error;

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Wire encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the state layer
    #[error(transparent)]
    Core(#[from] replica_core::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
