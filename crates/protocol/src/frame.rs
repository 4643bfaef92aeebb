//! Frame codec.
//!
//! # Wire format
//!
//! ```text
//! COMMAND: [command_size bytes: ASCII token, space padded]
//! HEADER:  [header_size bytes: UTF-8 JSON, space padded]
//! CHUNK:   [8 bytes BE: len][len bytes: raw data]
//! ```
//!
//! Every write is flushed before returning. Callers that share a writer
//! between tasks must hold a lock across all frames of one logical step.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::constants::{COMMAND_SIZE, Command, HEADER_SIZE, MAX_CHUNK_LEN, PAD_BYTE};
use crate::error::FrameError;

/// Default granularity of socket reads while assembling a chunk.
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// Encodes and decodes frames with configurable widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    command_size: usize,
    header_size: usize,
    read_buffer: usize,
    max_chunk: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(COMMAND_SIZE, HEADER_SIZE)
    }
}

impl FrameCodec {
    /// Creates a codec with the given command and header frame widths.
    pub fn new(command_size: usize, header_size: usize) -> Self {
        Self {
            command_size,
            header_size,
            read_buffer: DEFAULT_READ_BUFFER,
            max_chunk: MAX_CHUNK_LEN,
        }
    }

    /// Sets the maximum number of bytes requested per socket read.
    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    /// Sets the largest chunk length accepted by [`read_chunk`](Self::read_chunk).
    pub fn with_max_chunk(mut self, max_chunk: u64) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    pub fn command_size(&self) -> usize {
        self.command_size
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    // -----------------------------------------------------------------------
    // Pure encoding
    // -----------------------------------------------------------------------

    /// Encodes a command into a padded frame.
    pub fn encode_command(&self, command: Command) -> Result<Vec<u8>, FrameError> {
        pad("command", command.as_str().as_bytes(), self.command_size)
    }

    /// Decodes a command frame into its trimmed token.
    ///
    /// Never fails: a frame that is not valid UTF-8 decodes lossily and is
    /// then treated as an unknown command by the caller.
    pub fn decode_command(&self, frame: &[u8]) -> String {
        String::from_utf8_lossy(frame)
            .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
            .to_string()
    }

    /// Serializes a header document into a padded frame.
    pub fn encode_header<T: Serialize>(&self, header: &T) -> Result<Vec<u8>, FrameError> {
        let json = serde_json::to_vec(header)?;
        pad("header", &json, self.header_size)
    }

    /// Parses a padded header frame.
    pub fn decode_header<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, FrameError> {
        let end = frame
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\0' | b'\n' | b'\r' | b'\t'))
            .map_or(0, |i| i + 1);
        Ok(serde_json::from_slice(&frame[..end])?)
    }

    // -----------------------------------------------------------------------
    // Stream I/O
    // -----------------------------------------------------------------------

    /// Writes one command frame.
    pub async fn write_command<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        command: Command,
    ) -> Result<(), FrameError> {
        let frame = self.encode_command(command)?;
        write_flush(writer, &frame).await?;
        trace!(%command, "command frame written");
        Ok(())
    }

    /// Reads one command frame and returns the trimmed token.
    pub async fn read_command<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<String, FrameError> {
        let mut frame = vec![0u8; self.command_size];
        reader
            .read_exact(&mut frame)
            .await
            .map_err(FrameError::from_io)?;
        Ok(self.decode_command(&frame))
    }

    /// Writes one header frame.
    pub async fn write_header<W: AsyncWrite + Unpin, T: Serialize>(
        &self,
        writer: &mut W,
        header: &T,
    ) -> Result<(), FrameError> {
        let frame = self.encode_header(header)?;
        write_flush(writer, &frame).await
    }

    /// Writes a command frame immediately followed by its header frame.
    ///
    /// Both frames are encoded before anything is written, so an oversized
    /// header never leaves a dangling command on the stream.
    pub async fn write_command_with_header<W: AsyncWrite + Unpin, T: Serialize>(
        &self,
        writer: &mut W,
        command: Command,
        header: &T,
    ) -> Result<(), FrameError> {
        let mut frame = self.encode_command(command)?;
        frame.extend_from_slice(&self.encode_header(header)?);
        write_flush(writer, &frame).await?;
        trace!(%command, "command and header frames written");
        Ok(())
    }

    /// Reads one header frame and parses it.
    pub async fn read_header<R: AsyncRead + Unpin, T: DeserializeOwned>(
        &self,
        reader: &mut R,
    ) -> Result<T, FrameError> {
        let mut frame = vec![0u8; self.header_size];
        reader
            .read_exact(&mut frame)
            .await
            .map_err(FrameError::from_io)?;
        self.decode_header(&frame)
    }

    /// Writes a length-prefixed data chunk.
    pub async fn write_chunk<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        data: &[u8],
    ) -> Result<(), FrameError> {
        writer
            .write_u64(data.len() as u64)
            .await
            .map_err(FrameError::from_io)?;
        write_flush(writer, data).await?;
        trace!(len = data.len(), "chunk written");
        Ok(())
    }

    /// Reads a length-prefixed data chunk.
    ///
    /// Loops until exactly `len` bytes have been accumulated; a peer that
    /// closes mid-chunk yields [`FrameError::ConnectionClosed`].
    pub async fn read_chunk<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Vec<u8>, FrameError> {
        let len = reader.read_u64().await.map_err(FrameError::from_io)?;
        if len > self.max_chunk {
            return Err(FrameError::ChunkTooLarge {
                len,
                max: self.max_chunk,
            });
        }

        let len = len as usize;
        let mut data = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let end = (filled + self.read_buffer).min(len);
            let n = reader
                .read(&mut data[filled..end])
                .await
                .map_err(FrameError::from_io)?;
            if n == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            filled += n;
        }
        trace!(len, "chunk read");
        Ok(data)
    }
}

fn pad(kind: &'static str, bytes: &[u8], width: usize) -> Result<Vec<u8>, FrameError> {
    if bytes.len() > width {
        return Err(FrameError::Oversize {
            kind,
            len: bytes.len(),
            max: width,
        });
    }
    let mut frame = Vec::with_capacity(width);
    frame.extend_from_slice(bytes);
    frame.resize(width, PAD_BYTE);
    Ok(frame)
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), FrameError> {
    writer.write_all(bytes).await.map_err(FrameError::from_io)?;
    writer.flush().await.map_err(FrameError::from_io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{ErrorHeader, RequestHeader, ResumeHeader};

    #[tokio::test]
    async fn command_frame_is_space_padded() {
        let codec = FrameCodec::default();
        let mut buf = Vec::new();
        codec.write_command(&mut buf, Command::Data).await.unwrap();

        assert_eq!(buf.len(), COMMAND_SIZE);
        assert_eq!(&buf[..4], b"DATA");
        assert!(buf[4..].iter().all(|b| *b == b' '));

        let mut cursor = &buf[..];
        assert_eq!(codec.read_command(&mut cursor).await.unwrap(), "DATA");
    }

    #[tokio::test]
    async fn header_frame_roundtrip() {
        let codec = FrameCodec::default();
        let header = RequestHeader {
            file_name: "a.bin".into(),
            file_size: 3_145_728,
            file_hash: "9e107d9d372bb6826bd81d3542a419d6".into(),
        };

        let mut buf = Vec::new();
        codec.write_header(&mut buf, &header).await.unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut cursor = &buf[..];
        let parsed: RequestHeader = codec.read_header(&mut cursor).await.unwrap();
        assert_eq!(parsed, header);
    }

    #[tokio::test]
    async fn step_with_oversized_header_writes_nothing() {
        let codec = FrameCodec::default();
        let mut buf = Vec::new();
        let header = ErrorHeader::new("x".repeat(HEADER_SIZE));
        let err = codec
            .write_command_with_header(&mut buf, Command::Error, &header)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Oversize { .. }));
        assert!(buf.is_empty());

        codec
            .write_command_with_header(&mut buf, Command::Error, &ErrorHeader::new("boom"))
            .await
            .unwrap();
        assert_eq!(buf.len(), COMMAND_SIZE + HEADER_SIZE);
    }

    #[test]
    fn oversized_header_rejected() {
        let codec = FrameCodec::default();
        let header = ErrorHeader::new("x".repeat(HEADER_SIZE));
        let err = codec.encode_header(&header).unwrap_err();
        assert!(matches!(err, FrameError::Oversize { kind: "header", .. }));
    }

    #[test]
    fn decode_command_trims_nul_padding() {
        let codec = FrameCodec::default();
        let mut frame = b"ACCEPT".to_vec();
        frame.resize(COMMAND_SIZE, 0);
        assert_eq!(codec.decode_command(&frame), "ACCEPT");
    }

    #[test]
    fn decode_header_tolerates_nul_padding() {
        let codec = FrameCodec::default();
        let mut frame = br#"{"file_name":"a.bin","transferred_size":1048576}"#.to_vec();
        frame.resize(HEADER_SIZE, 0);
        let h: ResumeHeader = codec.decode_header(&frame).unwrap();
        assert_eq!(h.transferred_size, 1_048_576);
    }

    #[tokio::test]
    async fn truncated_command_is_connection_closed() {
        let codec = FrameCodec::default();
        let mut cursor: &[u8] = b"REQ";
        let err = codec.read_command(&mut cursor).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn chunk_roundtrip_with_small_read_buffer() {
        let codec = FrameCodec::default().with_read_buffer(3);
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut buf = Vec::new();
        codec.write_chunk(&mut buf, &data).await.unwrap();
        assert_eq!(&buf[..8], &1000u64.to_be_bytes());

        let mut cursor = &buf[..];
        assert_eq!(codec.read_chunk(&mut cursor).await.unwrap(), data);
    }

    #[tokio::test]
    async fn chunk_cut_short_is_connection_closed() {
        let codec = FrameCodec::default();
        let mut buf = Vec::new();
        codec.write_chunk(&mut buf, &[7u8; 100]).await.unwrap();
        buf.truncate(8 + 40);

        let mut cursor = &buf[..];
        let err = codec.read_chunk(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_chunk_length_rejected() {
        let codec = FrameCodec::default().with_max_chunk(16);
        let mut buf = 17u64.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 17]);

        let mut cursor = &buf[..];
        let err = codec.read_chunk(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::ChunkTooLarge { len: 17, max: 16 }));
    }

    #[tokio::test]
    async fn empty_chunk() {
        let codec = FrameCodec::default();
        let mut buf = Vec::new();
        codec.write_chunk(&mut buf, &[]).await.unwrap();
        let mut cursor = &buf[..];
        assert!(codec.read_chunk(&mut cursor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_widths() {
        let codec = FrameCodec::new(16, 128);
        let mut buf = Vec::new();
        codec.write_command(&mut buf, Command::Complete).await.unwrap();
        codec
            .write_header(&mut buf, &ErrorHeader::new("disk full"))
            .await
            .unwrap();
        assert_eq!(buf.len(), 16 + 128);

        let mut cursor = &buf[..];
        assert_eq!(codec.read_command(&mut cursor).await.unwrap(), "COMPLETE");
        let h: ErrorHeader = codec.read_header(&mut cursor).await.unwrap();
        assert_eq!(h.error, "disk full");
    }
}
