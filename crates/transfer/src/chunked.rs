use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
            _ => TransferError::Io(e),
        })?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.file_size {
            return Err(TransferError::ProtocolViolation(format!(
                "resume offset {offset} beyond file size {}",
                self.file_size
            )));
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    ///
    /// Never reads past the size observed at open, even if the file grows.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            // Truncated underneath us.
            return Ok(None);
        }
        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(Some(buf))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size in bytes at open.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Appends received chunks to a destination file.
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    written: u64,
}

impl ChunkWriter {
    /// Creates (or truncates) `path`, creating parent directories as needed.
    pub async fn create(path: &Path) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Reopens a partial file, discarding anything past `offset`.
    pub async fn resume(path: &Path, offset: u64) -> Result<Self, TransferError> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        let len = file.metadata().await?.len();
        if len < offset {
            return Err(TransferError::InvalidPath(format!(
                "{} holds {len} bytes, cannot resume at {offset}",
                path.display()
            )));
        }
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: offset,
        })
    }

    /// Appends a chunk and returns the new file length.
    ///
    /// The data has reached the OS when this returns.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<u64, TransferError> {
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.written += data.len() as u64;
        Ok(self.written)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and syncs the file, then closes it.
    pub async fn finish(mut self) -> Result<(), TransferError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}
