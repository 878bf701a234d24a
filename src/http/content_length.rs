//! Body reader bounded by a declared `Content-Length`.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::http::buffered::BufferedConnectionStream;

/// Stops reading once `Content-Length` bytes were delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedBodyReader {
    remaining: u64,
}

impl BoundedBodyReader {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read at most `min(buf.len(), remaining)` bytes. Returns 0 once the
    /// declared length has been delivered.
    pub async fn read(
        &mut self,
        stream: &mut BufferedConnectionStream,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = stream.read(&mut buf[..want], cancel).await?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
