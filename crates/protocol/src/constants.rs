use std::fmt;
use std::str::FromStr;

/// Width of a command frame in bytes.
pub const COMMAND_SIZE: usize = 64;

/// Width of a header frame in bytes.
pub const HEADER_SIZE: usize = 1024;

/// Width of the big-endian length prefix in front of every data chunk.
pub const CHUNK_LEN_SIZE: usize = 8;

/// Upper bound accepted for a single chunk length (64 MiB).
///
/// Senders use 1 MiB chunks by default; anything near this limit is
/// treated as a corrupt or hostile stream rather than allocated.
pub const MAX_CHUNK_LEN: u64 = 64 * 1024 * 1024;

/// Byte used to right-pad command and header frames.
pub const PAD_BYTE: u8 = b' ';

/// Command token carried in a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Sender offers a file (followed by a request header).
    Request,
    /// Receiver accepts and starts from offset 0.
    Accept,
    /// Receiver declines the offer.
    Reject,
    /// One data chunk follows (length-prefixed).
    Data,
    /// Receiver accepts and asks to continue from an offset (followed by a resume header).
    Resume,
    /// Sender has sent every byte (followed by a complete header).
    Complete,
    /// Either side aborts the transfer (followed by an error header).
    Error,
}

impl Command {
    /// All commands in wire order.
    pub const ALL: [Command; 7] = [
        Command::Request,
        Command::Accept,
        Command::Reject,
        Command::Data,
        Command::Resume,
        Command::Complete,
        Command::Error,
    ];

    /// ASCII token written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Request => "REQUEST",
            Command::Accept => "ACCEPT",
            Command::Reject => "REJECT",
            Command::Data => "DATA",
            Command::Resume => "RESUME",
            Command::Complete => "COMPLETE",
            Command::Error => "ERROR",
        }
    }

    /// Returns `true` if the command is followed by a header frame.
    pub fn has_header(&self) -> bool {
        matches!(
            self,
            Command::Request | Command::Resume | Command::Complete | Command::Error
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a token that is not a known command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}
