//! In-memory transport for unit tests.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Replays a fixed server script and records everything written to it.
pub struct MockTransport {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    /// Largest slice handed out per read, to exercise partial reads.
    max_read: usize,
}

impl MockTransport {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: Cursor::new(input.to_vec()),
            written: Arc::new(Mutex::new(Vec::new())),
            max_read: usize::MAX,
        }
    }

    pub fn max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let position = self.input.position() as usize;
        let data = self.input.get_ref();
        let available = data.len().saturating_sub(position);
        let n = available.min(buf.remaining()).min(self.max_read);
        buf.put_slice(&data[position..position + n]);
        self.input.set_position((position + n) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.written.lock() {
            Ok(mut written) => {
                written.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::other("poisoned"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
