//! JSON documents carried in header frames.
//!
//! Keys are snake_case on the wire.

use serde::{Deserialize, Serialize};

/// Offer sent with `REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
}

/// Receiver reply sent with `RESUME`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeHeader {
    pub file_name: String,
    #[serde(default)]
    pub transferred_size: u64,
}

/// Final digest sent with `COMPLETE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteHeader {
    pub file_hash: String,
}

/// Failure reason sent with `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHeader {
    #[serde(default = "unknown_error")]
    pub error: String,
}

impl ErrorHeader {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

fn unknown_error() -> String {
    "unknown error".into()
}
