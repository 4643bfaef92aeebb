//! Error types for the frame codec.

/// Errors produced while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("{kind} frame overflow: {len} bytes (max {max})")]
    Oversize {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    #[error("chunk length {len} exceeds limit {max}")]
    ChunkTooLarge { len: u64, max: u64 },

    #[error("invalid header JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FrameError {
    /// Maps a socket error, turning a premature EOF or reset into [`FrameError::ConnectionClosed`].
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        }
    }

    /// Returns `true` if the peer went away.
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }
}
