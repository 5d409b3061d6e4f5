//! Error types for replica-hub

use replica_core::SessionId;
use thiserror::Error;

/// Result type for replica-hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in replica-hub
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration text is not valid RON
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// Configuration values are out of range
    #[error("invalid config: {0}")]
    Config(String),

    /// Session not registered with the loop
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] replica_core::Error),

    /// Netcode error
    #[error("netcode error: {0}")]
    Netcode(#[from] replica_netcode::Error),
}

// Compile-time check that Error is Send + Sync so drivers can hand it across tasks.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
