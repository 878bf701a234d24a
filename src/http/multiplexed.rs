//! Demultiplexer for attach/exec style hijacked connections.
//!
//! Frames are an 8-byte header followed by the payload:
//!
//! ```text
//! [stream: u8][0, 0, 0][length: u32 big-endian][payload ...]
//! ```
//!
//! With a TTY the daemon sends raw output instead; every read is then
//! reported as standard output.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::resilience::timeouts::guarded;

const HEADER_LEN: usize = 8;
const COPY_BUFFER: usize = 80 * 1024;

/// The stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetStream {
    StandardIn = 0,
    StandardOut = 1,
    StandardError = 2,
}

impl TryFrom<u8> for TargetStream {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TargetStream::StandardIn),
            1 => Ok(TargetStream::StandardOut),
            2 => Ok(TargetStream::StandardError),
            other => Err(Error::UnknownStreamType(other)),
        }
    }
}

/// Outcome of one [`MultiplexedStream::read_output`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub count: usize,
    pub target: TargetStream,
}

impl ReadResult {
    pub fn is_eof(&self) -> bool {
        self.count == 0
    }
}

/// Reads framed output from, and writes raw input to, a hijacked connection.
#[derive(Debug)]
pub struct MultiplexedStream<S> {
    inner: S,
    multiplexed: bool,
    target: TargetStream,
    remaining: usize,
}

impl<S> MultiplexedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `multiplexed` is false for TTY sessions.
    pub fn new(inner: S, multiplexed: bool) -> Self {
        Self {
            inner,
            multiplexed,
            target: TargetStream::StandardOut,
            remaining: 0,
        }
    }

    /// Read output into `buf`. A zero count means the daemon closed the stream.
    pub async fn read_output(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<ReadResult> {
        if !self.multiplexed {
            let inner = &mut self.inner;
            let count = guarded("read", cancel, None, inner.read(buf)).await?;
            return Ok(ReadResult {
                count,
                target: TargetStream::StandardOut,
            });
        }

        while self.remaining == 0 {
            let mut header = [0u8; HEADER_LEN];
            let mut filled = 0;
            while filled < HEADER_LEN {
                let inner = &mut self.inner;
                let n = guarded("read", cancel, None, inner.read(&mut header[filled..])).await?;
                if n == 0 {
                    if filled == 0 {
                        return Ok(ReadResult {
                            count: 0,
                            target: self.target,
                        });
                    }
                    return Err(Error::UnexpectedEndOfStream);
                }
                filled += n;
            }

            self.target = TargetStream::try_from(header[0])?;
            self.remaining = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        }

        let want = buf.len().min(self.remaining);
        let inner = &mut self.inner;
        let count = guarded("read", cancel, None, inner.read(&mut buf[..want])).await?;
        if count == 0 && want > 0 {
            return Err(Error::UnexpectedEndOfStream);
        }
        self.remaining -= count;
        Ok(ReadResult {
            count,
            target: self.target,
        })
    }

    /// Write raw input (standard input of the process).
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let inner = &mut self.inner;
        guarded("write", cancel, None, async move {
            inner.write_all(data).await?;
            inner.flush().await
        })
        .await
    }

    /// Signal end of input by closing the write half.
    pub async fn close_write(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Forward everything from `input` as standard input.
    pub async fn copy_from<R>(&mut self, input: &mut R, cancel: &CancellationToken) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut copied = 0u64;
        loop {
            let n = guarded("read", cancel, None, input.read(&mut buf)).await?;
            if n == 0 {
                return Ok(copied);
            }
            self.write(&buf[..n], cancel).await?;
            copied += n as u64;
        }
    }

    /// Route every frame to the writer of its stream until EOF.
    pub async fn copy_output_to<I, O, E>(
        &mut self,
        stdin: &mut I,
        stdout: &mut O,
        stderr: &mut E,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        I: AsyncWrite + Unpin + ?Sized,
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let result = self.read_output(&mut buf, cancel).await?;
            if result.is_eof() {
                return Ok(());
            }
            let data = &buf[..result.count];
            match result.target {
                TargetStream::StandardIn => stdin.write_all(data).await?,
                TargetStream::StandardOut => stdout.write_all(data).await?,
                TargetStream::StandardError => stderr.write_all(data).await?,
            }
        }
    }

    /// Collect standard output and standard error as text.
    pub async fn read_output_to_end(&mut self, cancel: &CancellationToken) -> Result<(String, String)> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        self.copy_output_to(&mut tokio::io::sink(), &mut stdout, &mut stderr, cancel)
            .await?;
        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}
