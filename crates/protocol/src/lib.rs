//! Wire protocol for single-file transfers over a byte stream.
//!
//! A transfer is a sequence of fixed-width command frames, optionally
//! followed by a fixed-width JSON header frame or a length-prefixed data
//! chunk. See [`frame`] for the byte layout.

pub mod constants;
pub mod error;
pub mod frame;
pub mod headers;

pub use constants::{
    CHUNK_LEN_SIZE, COMMAND_SIZE, Command, HEADER_SIZE, MAX_CHUNK_LEN, UnknownCommand,
};
pub use error::FrameError;
pub use frame::{DEFAULT_READ_BUFFER, FrameCodec};
pub use headers::{CompleteHeader, ErrorHeader, RequestHeader, ResumeHeader};
