//! Buffered I/O streams for RFB protocol communication.
//!
//! All multi-byte integers are big-endian (network byte order).
//!
//! ```no_run
//! use rfb_protocol::io::{RfbInStream, RfbOutStream};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> std::io::Result<()> {
//! let (reader, writer) = TcpStream::connect("localhost:5900").await?.into_split();
//!
//! let mut input = RfbInStream::new(reader);
//! let message_type = input.read_u8().await?;
//!
//! let mut output = RfbOutStream::new(writer);
//! output.write_u8(3);
//! output.flush().await?;
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffered input stream for reading RFB protocol data.
///
/// The stream keeps a running count of bytes handed to callers
/// ([`consumed`](Self::consumed)), which the client uses to report how many
/// wire bytes each framebuffer update occupied.
pub struct RfbInStream<R> {
    reader: R,
    buffer: BytesMut,
    consumed: u64,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    /// Create a new input stream with an 8KB buffer.
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, 8192)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
            consumed: 0,
        }
    }

    /// Read from the underlying reader until at least `n` bytes are buffered.
    async fn ensure_bytes(&mut self, n: usize) -> std::io::Result<()> {
        if self.buffer.capacity() < n {
            self.buffer.reserve(n - self.buffer.len());
        }
        while self.buffer.len() < n {
            let bytes_read = self.reader.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, self.buffer.len()),
                ));
            }
        }
        Ok(())
    }

    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.ensure_bytes(1).await?;
        self.consumed += 1;
        Ok(self.buffer.get_u8())
    }

    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.ensure_bytes(2).await?;
        self.consumed += 2;
        Ok(self.buffer.get_u16())
    }

    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.ensure_bytes(4).await?;
        self.consumed += 4;
        Ok(self.buffer.get_u32())
    }

    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.ensure_bytes(4).await?;
        self.consumed += 4;
        Ok(self.buffer.get_i32())
    }

    /// Read exactly `buf.len()` bytes.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.ensure_bytes(buf.len()).await?;
        self.consumed += buf.len() as u64;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Read a `u32` length prefix followed by that many bytes.
    pub async fn read_length_prefixed(&mut self, limit: usize) -> std::io::Result<Vec<u8>> {
        let len = self.read_u32().await? as usize;
        if len > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("length {} exceeds limit {}", len, limit),
            ));
        }
        let mut data = vec![0u8; len];
        self.read_bytes(&mut data).await?;
        Ok(data)
    }

    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        self.ensure_bytes(n).await?;
        self.consumed += n as u64;
        self.buffer.advance(n);
        Ok(())
    }

    /// Bytes currently buffered (readable without I/O).
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes returned to callers since the stream was created.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Buffered output stream for writing RFB protocol data.
///
/// Writes are buffered; nothing reaches the socket until
/// [`flush()`](Self::flush) is called.
pub struct RfbOutStream<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> RfbOutStream<W> {
    pub fn new(writer: W) -> Self {
        Self::with_capacity(writer, 8192)
    }

    pub fn with_capacity(writer: W, capacity: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write out everything buffered and flush the underlying writer.
    ///
    /// Cancel safe: bytes leave the buffer as soon as the writer accepts
    /// them, so a cancelled flush resumes where it stopped on the next call.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        while self.buffer.has_remaining() {
            let n = self.writer.write(&self.buffer).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            self.buffer.advance(n);
        }
        self.writer.flush().await
    }

    /// Number of bytes waiting to be flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Shut down the write side of the underlying writer.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the stream and return the writer. Buffered data is discarded.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
