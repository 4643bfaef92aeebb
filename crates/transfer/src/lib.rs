//! Resumable single-file transfer over a framed byte stream.
//!
//! A [`Link`] wraps one connected socket. It runs a control task that reads
//! command frames from the peer and, while this side is sending, a data task
//! that streams the file chunk by chunk. Both share one lock per link, so
//! frames of one logical step are never interleaved on the wire.
//!
//! Interrupted receives leave a `<destination>.resume` sidecar (see
//! [`resume`]) so a later request for the same file continues where the
//! previous one stopped.

mod chunked;
mod config;
mod events;
pub mod hash;
mod link;
mod policy;
mod progress;
pub mod resume;
mod session;
mod validation;

use std::path::PathBuf;

use filebridge_protocol::FrameError;

pub use chunked::{ChunkReader, ChunkWriter};
pub use config::TransferConfig;
pub use events::{DEFAULT_EVENT_BUFFER, EventSink, FileOffer, TransferEvent};
pub use hash::HashAlgorithm;
pub use link::{Link, LinkOptions, SendOutcome};
pub use policy::{AcceptAll, AcceptPolicy, DecisionFuture, PendingOffer, PromptPolicy, RejectAll};
pub use progress::{Progress, Throughput};
pub use resume::ResumeRecord;
pub use session::{Role, TransferSession, TransferState};
pub use validation::validate_file_name;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("a transfer is already in progress")]
    Busy,

    #[error("no transfer in progress")]
    NotActive,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidState {
        from: TransferState,
        to: TransferState,
    },

    #[error("peer reported error: {0}")]
    PeerError(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Classifies the error for event consumers.
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::FileNotFound(_) => FailureKind::FileNotFound,
            TransferError::ConnectionClosed => FailureKind::ConnectionClosed,
            TransferError::IntegrityMismatch { .. } => FailureKind::IntegrityMismatch,
            TransferError::Io(_) => FailureKind::IoFault,
            TransferError::PeerError(_) => FailureKind::PeerError,
            TransferError::Cancelled => FailureKind::Cancelled,
            TransferError::ProtocolViolation(_)
            | TransferError::InvalidPath(_)
            | TransferError::Busy
            | TransferError::NotActive
            | TransferError::InvalidState { .. } => FailureKind::ProtocolViolation,
        }
    }

    /// Builds an equivalent error; `io::Error` is not `Clone`.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            TransferError::FileNotFound(p) => TransferError::FileNotFound(p.clone()),
            TransferError::ConnectionClosed => TransferError::ConnectionClosed,
            TransferError::ProtocolViolation(m) => TransferError::ProtocolViolation(m.clone()),
            TransferError::IntegrityMismatch { expected, actual } => {
                TransferError::IntegrityMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                }
            }
            TransferError::Io(e) => TransferError::Io(std::io::Error::new(e.kind(), e.to_string())),
            TransferError::InvalidPath(m) => TransferError::InvalidPath(m.clone()),
            TransferError::Busy => TransferError::Busy,
            TransferError::NotActive => TransferError::NotActive,
            TransferError::InvalidState { from, to } => TransferError::InvalidState {
                from: *from,
                to: *to,
            },
            TransferError::PeerError(m) => TransferError::PeerError(m.clone()),
            TransferError::Cancelled => TransferError::Cancelled,
        }
    }
}

impl From<FrameError> for TransferError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => TransferError::ConnectionClosed,
            FrameError::Io(e) => TransferError::Io(e),
            other => TransferError::ProtocolViolation(other.to_string()),
        }
    }
}

/// Cloneable classification of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    FileNotFound,
    ConnectionClosed,
    ProtocolViolation,
    IntegrityMismatch,
    IoFault,
    PeerError,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_map_to_taxonomy() {
        let closed: TransferError = FrameError::ConnectionClosed.into();
        assert_eq!(closed.kind(), FailureKind::ConnectionClosed);

        let io: TransferError = FrameError::Io(std::io::Error::other("disk")).into();
        assert_eq!(io.kind(), FailureKind::IoFault);

        let too_big: TransferError = FrameError::ChunkTooLarge { len: 10, max: 1 }.into();
        assert_eq!(too_big.kind(), FailureKind::ProtocolViolation);
    }

    #[test]
    fn mismatch_message_names_both_digests() {
        let err = TransferError::IntegrityMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.to_string(), "hash mismatch: expected aa, got bb");
        assert_eq!(err.kind(), FailureKind::IntegrityMismatch);
    }
}
