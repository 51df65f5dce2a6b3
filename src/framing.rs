//! Length-prefixed framing shared by the Client and Persona links.
//!
//! Every frame on either link is a 4-byte big-endian length `L` followed by
//! exactly `L` payload bytes. Short reads/writes are handled by accumulating
//! until the full header or body has arrived; any I/O error or EOF is
//! reported to the caller, who treats it as fatal to the link.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_LEN: usize = 4;

pub type Frame = Vec<u8>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("link I/O error")]
    Io(#[from] std::io::Error),

    #[error("link closed (EOF)")]
    Eof,
}

/// Reads one length-prefixed frame at a time from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one frame, blocking until the full header and body arrive.
    ///
    /// `read_exact` already accumulates across short reads; a zero-length
    /// read before any bytes are consumed surfaces as [`Error::Eof`], any
    /// other I/O failure (including a partial read hitting EOF mid-frame)
    /// as [`Error::Io`].
    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        let mut header = [0u8; HEADER_LEN];

        match self.inner.read(&mut header[..1]).await? {
            0 => return Err(Error::Eof),
            _ => {}
        }
        self.inner.read_exact(&mut header[1..]).await?;

        let length = BigEndian::read_u32(&header) as usize;
        let mut payload = vec![0u8; length];
        self.inner.read_exact(&mut payload).await?;

        Ok(payload)
    }
}

/// Writes length-prefixed frames to an async byte sink.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut header = [0u8; HEADER_LEN];
        BigEndian::write_u32(&mut header, payload.len() as u32);

        self.inner.write_all(&header).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_small_frame() {
        let (a, b) = duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer.write_frame(b"hello").await.unwrap();
        let frame = reader.read_frame().await.unwrap();

        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn round_trips_empty_frame() {
        let (a, b) = duplex(4096);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer.write_frame(&[]).await.unwrap();
        let frame = reader.read_frame().await.unwrap();

        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn round_trips_across_short_reads() {
        // duplex with a tiny buffer forces the underlying stream to yield
        // partial writes/reads, exercising the accumulation discipline.
        let (a, b) = duplex(3);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        let payload = vec![7u8; 500];
        let payload_clone = payload.clone();

        let write_task = tokio::spawn(async move {
            writer.write_frame(&payload_clone).await.unwrap();
        });

        let frame = reader.read_frame().await.unwrap();
        write_task.await.unwrap();

        assert_eq!(frame, payload);
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_reported() {
        let (a, b) = duplex(4096);
        drop(a);
        let mut reader = FrameReader::new(b);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::Eof));
    }
}
