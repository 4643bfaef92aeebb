use std::path::PathBuf;
use std::time::Duration;

use filebridge_protocol::{COMMAND_SIZE, DEFAULT_READ_BUFFER, FrameCodec, HEADER_SIZE, MAX_CHUNK_LEN};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_CHUNK_SIZE;
use crate::hash::HashAlgorithm;

/// Tunables for one link. Both peers must agree on the frame widths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes read from the source file per `DATA` frame.
    pub chunk_size: usize,
    /// Largest socket read while assembling a chunk.
    pub buffer_size: usize,
    pub header_size: usize,
    pub command_size: usize,
    /// Pause between chunks on the sending side, in milliseconds.
    pub chunk_pause_ms: u64,
    pub hash_algorithm: HashAlgorithm,
    /// When false, incoming transfers ignore resume sidecars and restart.
    pub resume_enabled: bool,
    /// Directory incoming files are written into.
    pub download_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_READ_BUFFER,
            header_size: HEADER_SIZE,
            command_size: COMMAND_SIZE,
            chunk_pause_ms: 1,
            hash_algorithm: HashAlgorithm::default(),
            resume_enabled: true,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl TransferConfig {
    /// Builds the frame codec matching these settings.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.command_size, self.header_size)
            .with_read_buffer(self.buffer_size)
            .with_max_chunk(MAX_CHUNK_LEN.max(self.chunk_size as u64))
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    /// Chunk size with a floor of one byte.
    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.chunk_size, 1024 * 1024);
        assert_eq!(cfg.buffer_size, 8192);
        assert_eq!(cfg.header_size, 1024);
        assert_eq!(cfg.command_size, 64);
        assert_eq!(cfg.chunk_pause(), Duration::from_millis(1));
        assert_eq!(cfg.hash_algorithm, HashAlgorithm::Md5);
        assert!(cfg.resume_enabled);
        assert_eq!(cfg.download_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TransferConfig =
            serde_json::from_str(r#"{"chunk_size":4096,"hash_algorithm":"sha256"}"#).unwrap();
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(cfg.header_size, 1024);
    }

    #[test]
    fn codec_uses_configured_widths() {
        let cfg = TransferConfig {
            command_size: 32,
            header_size: 512,
            ..Default::default()
        };
        let codec = cfg.codec();
        assert_eq!(codec.command_size(), 32);
        assert_eq!(codec.header_size(), 512);
    }

    #[test]
    fn zero_chunk_size_is_floored() {
        let cfg = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_chunk_size(), 1);
    }
}
