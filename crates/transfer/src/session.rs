use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::TransferError;
use crate::progress::{Progress, Throughput};

/// Which side of the transfer this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        })
    }
}

/// Lifecycle of a single transfer.
///
/// ```text
/// Idle -> Requested -> Accepted -> Active <-> Paused
///                   \-> Rejected       \-> Completed
/// any non-terminal state -> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Idle,
    Requested,
    Accepted,
    Rejected,
    Active,
    Paused,
    Completed,
    Error,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Requested => "requested",
            TransferState::Accepted => "accepted",
            TransferState::Rejected => "rejected",
            TransferState::Active => "active",
            TransferState::Paused => "paused",
            TransferState::Completed => "completed",
            TransferState::Error => "error",
        }
    }

    /// `Completed`, `Rejected` and `Error` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Rejected | TransferState::Error
        )
    }

    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        match (*self, next) {
            (Idle, Requested)
            | (Requested, Accepted)
            | (Requested, Rejected)
            | (Accepted, Active)
            | (Active, Paused)
            | (Paused, Active)
            | (Active, Completed) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one file transfer on one side of a link.
#[derive(Debug)]
pub struct TransferSession {
    id: Uuid,
    role: Role,
    state: TransferState,
    file_path: PathBuf,
    file_name: String,
    file_size: u64,
    transferred_size: u64,
    file_hash: String,
    throughput: Throughput,
    speed: f64,
    peer: Option<SocketAddr>,
    error: Option<String>,
}

impl TransferSession {
    /// Creates an idle session.
    pub fn new(
        role: Role,
        file_path: PathBuf,
        file_name: String,
        file_size: u64,
        file_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: TransferState::Idle,
            file_path,
            file_name,
            file_size,
            transferred_size: 0,
            file_hash,
            throughput: Throughput::start(0),
            speed: 0.0,
            peer: None,
            error: None,
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Moves to `next`, rejecting edges outside the lifecycle.
    pub fn transition(&mut self, next: TransferState) -> Result<(), TransferError> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Sets the starting offset once the receiver has answered.
    pub fn start_at(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.file_size {
            return Err(TransferError::ProtocolViolation(format!(
                "offset {offset} exceeds file size {}",
                self.file_size
            )));
        }
        self.transferred_size = offset;
        self.restart_clock();
        Ok(())
    }

    /// Re-anchors the speed measurement at the current offset.
    pub fn restart_clock(&mut self) {
        self.throughput = Throughput::start(self.transferred_size);
        self.speed = 0.0;
    }

    /// Advances the offset by one chunk and returns the new total.
    pub fn record_chunk(&mut self, len: u64) -> Result<u64, TransferError> {
        let next = self.transferred_size.saturating_add(len);
        if next > self.file_size {
            return Err(TransferError::ProtocolViolation(format!(
                "received {next} bytes for a {}-byte file",
                self.file_size
            )));
        }
        self.transferred_size = next;
        self.speed = self.throughput.bytes_per_second(next);
        Ok(next)
    }

    /// Moves to `Error` unless already terminal. Returns whether it moved.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TransferState::Error;
        self.error = Some(reason.into());
        true
    }

    pub fn progress(&self) -> Progress {
        Progress {
            session_id: self.id,
            role: self.role,
            state: self.state,
            file_name: self.file_name.clone(),
            file_path: self.file_path.clone(),
            transferred_size: self.transferred_size,
            file_size: self.file_size,
            speed: self.speed,
            eta: match self.state {
                TransferState::Active => self
                    .throughput
                    .eta(self.transferred_size, self.file_size),
                _ => None,
            },
            peer: self.peer,
            error: self.error.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn transferred_size(&self) -> u64 {
        self.transferred_size
    }

    /// Digest announced in the offer.
    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}
