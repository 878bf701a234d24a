//! Buffered connection stream.
//!
//! # Responsibilities
//! - Read CRLF/LF-terminated lines for the response head and chunk headers
//! - Serve over-read bytes before touching the transport again
//! - Apply read/write deadlines and the cancellation token to every I/O call
//! - Expose the same byte sequence through `AsyncRead` for TLS and hijacking

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::net::opener::BoxedTransport;
use crate::resilience::timeouts::guarded;

/// Longest line accepted from the peer.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// A transport plus a read buffer.
pub struct BufferedConnectionStream {
    inner: BoxedTransport,
    buf: BytesMut,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl BufferedConnectionStream {
    pub fn new(inner: BoxedTransport) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub fn with_timeouts(
        inner: BoxedTransport,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            read_timeout,
            write_timeout,
            ..Self::new(inner)
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Pull more bytes from the transport into the buffer. Returns 0 on EOF.
    async fn fill(&mut self, cancel: &CancellationToken) -> Result<usize> {
        self.buf.reserve(READ_CHUNK);
        let inner = &mut self.inner;
        let buf = &mut self.buf;
        guarded("read", cancel, self.read_timeout, inner.read_buf(buf)).await
    }

    /// Read one line, without its terminator, decoded as Latin-1.
    pub async fn read_line(&mut self, cancel: &CancellationToken) -> Result<String> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                let mut line = self.buf.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                let line = latin1(&line);
                tracing::trace!(line = %line, "Read line");
                return Ok(line);
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE_LENGTH {
                return Err(Error::HeaderTooLarge(MAX_LINE_LENGTH));
            }

            if self.fill(cancel).await? == 0 {
                if self.buf.is_empty() {
                    return Err(Error::UnexpectedEndOfStream);
                }
                let mut line = self.buf.split();
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(latin1(&line));
            }
        }
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buf.is_empty() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let inner = &mut self.inner;
            return guarded("read", cancel, self.read_timeout, inner.read(buf)).await;
        }
        let n = buf.len().min(self.buf.len());
        buf[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        Ok(n)
    }

    pub async fn write_all(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let inner = &mut self.inner;
        guarded("write", cancel, self.write_timeout, inner.write_all(data)).await
    }

    pub async fn flush(&mut self, cancel: &CancellationToken) -> Result<()> {
        let inner = &mut self.inner;
        guarded("flush", cancel, self.write_timeout, inner.flush()).await
    }

    /// Close the write half of the transport.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for BufferedConnectionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedConnectionStream")
            .field("buffered", &self.buf.len())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

impl AsyncRead for BufferedConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buf.is_empty() {
            let n = out.remaining().min(self.buf.len());
            out.put_slice(&self.buf[..n]);
            self.buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, out)
    }
}

impl AsyncWrite for BufferedConnectionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
