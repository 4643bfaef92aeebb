//! Error types for the session host.

use filebridge_transfer::TransferError;

/// Errors produced while listening for or connecting to peers.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Transfer(#[from] TransferError),
}
