//! File digests.
//!
//! Digests are lowercase hex. Files are streamed in [`HASH_BLOCK_SIZE`]
//! blocks so memory use does not grow with file size.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Read granularity while hashing a file.
pub const HASH_BLOCK_SIZE: usize = 4096;

/// Digest used for the `file_hash` header fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown hash algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hashes an in-memory buffer.
pub fn digest_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Md5 => hex::encode(Md5::digest(data)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
    }
}

/// Hashes a whole file, blocking the calling thread.
pub fn file_digest(path: &Path, algorithm: HashAlgorithm) -> Result<String, TransferError> {
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
        _ => TransferError::Io(e),
    })?;
    let digest = match algorithm {
        HashAlgorithm::Md5 => stream_digest::<Md5>(file)?,
        HashAlgorithm::Sha256 => stream_digest::<Sha256>(file)?,
    };
    Ok(digest)
}

/// Hashes a whole file on the blocking pool.
pub async fn file_digest_async(
    path: PathBuf,
    algorithm: HashAlgorithm,
) -> Result<String, TransferError> {
    tokio::task::spawn_blocking(move || file_digest(&path, algorithm))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}

fn stream_digest<D: Digest>(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn md5_of_empty_input() {
        assert_eq!(
            digest_bytes(b"", HashAlgorithm::Md5),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            digest_bytes(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_digest_matches_bytes_across_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..HASH_BLOCK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();

        for algo in [HashAlgorithm::Md5, HashAlgorithm::Sha256] {
            let digest = file_digest(&path, algo).unwrap();
            assert_eq!(digest, digest_bytes(&data, algo));
            assert_eq!(digest.len(), algo.hex_len());
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = file_digest(&dir.path().join("nope"), HashAlgorithm::Md5).unwrap_err();
        assert!(matches!(err, TransferError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn async_digest_runs_on_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let digest = file_digest_async(path, HashAlgorithm::Md5).await.unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn parse_algorithm_names() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("sha-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
    }
}
