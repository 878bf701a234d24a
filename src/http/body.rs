//! Response body content.
//!
//! # Responsibilities
//! - Decide the body framing once, from the parsed response headers
//! - Build the matching body reader on first use
//! - Hand the raw connection to the caller when the body is unframed (hijack)
//!
//! # Design Decisions
//! - `Transfer-Encoding: chunked` wins over `Content-Length`
//! - Without either the body runs until the peer closes the connection
//! - The content owns the connection; dropping it closes the transport

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::http::buffered::BufferedConnectionStream;
use crate::http::chunked::ChunkedDecoder;
use crate::http::content_length::BoundedBodyReader;

const COPY_BUFFER: usize = 8 * 1024;

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Chunked,
    ContentLength(u64),
    RawUntilClose,
}

impl BodyFraming {
    /// Pick the framing from the response headers and the content headers.
    pub fn detect(headers: &HeaderMap, content_headers: &HeaderMap) -> Self {
        let chunked = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return BodyFraming::Chunked;
        }

        content_headers
            .get(CONTENT_LENGTH)
            .or_else(|| headers.get(CONTENT_LENGTH))
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(BodyFraming::ContentLength)
            .unwrap_or(BodyFraming::RawUntilClose)
    }
}

/// The framed reader for one body.
#[derive(Debug)]
enum BodyReader {
    Chunked(ChunkedDecoder),
    ContentLength(BoundedBodyReader),
    Raw,
}

impl BodyReader {
    fn for_framing(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Chunked => BodyReader::Chunked(ChunkedDecoder::new()),
            BodyFraming::ContentLength(length) => {
                BodyReader::ContentLength(BoundedBodyReader::new(length))
            }
            BodyFraming::RawUntilClose => BodyReader::Raw,
        }
    }
}

/// The body of a response plus its content headers.
#[derive(Debug)]
pub struct ResponseBodyContent {
    connection: Option<BufferedConnectionStream>,
    framing: Option<BodyFraming>,
    reader: Option<BodyReader>,
    headers: HeaderMap,
    cancel: CancellationToken,
}

impl ResponseBodyContent {
    pub(crate) fn new(
        connection: BufferedConnectionStream,
        headers: HeaderMap,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection: Some(connection),
            framing: None,
            reader: None,
            headers,
            cancel,
        }
    }

    /// Record the framing. Only the first call succeeds.
    pub(crate) fn resolve(&mut self, framing: BodyFraming) -> Result<()> {
        if self.framing.is_some() {
            return Err(Error::AlreadyResolved);
        }
        self.framing = Some(framing);
        Ok(())
    }

    pub fn framing(&self) -> Option<BodyFraming> {
        self.framing
    }

    /// The declared length, for `Content-Length` framed bodies.
    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            Some(BodyFraming::ContentLength(length)) => Some(length),
            _ => None,
        }
    }

    /// Content headers (`Content-Type`, `Content-Length`, `Expires`, ...).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Read the next piece of the body. Returns 0 at the end of the body.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(stream) = self.connection.as_mut() else {
            return Ok(0);
        };
        let framing = self.framing.unwrap_or(BodyFraming::RawUntilClose);
        let reader = self
            .reader
            .get_or_insert_with(|| BodyReader::for_framing(framing));

        match reader {
            BodyReader::Chunked(decoder) => decoder.read(stream, buf, &self.cancel).await,
            BodyReader::ContentLength(bounded) => bounded.read(stream, buf, &self.cancel).await,
            BodyReader::Raw => stream.read(buf, &self.cancel).await,
        }
    }

    /// Read the whole body.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let capacity = self.content_length().unwrap_or(0).min(1 << 20) as usize;
        let mut body = BytesMut::with_capacity(capacity);
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        Ok(body.freeze())
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub async fn text(&mut self) -> Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Stream the body into `writer`. Returns the number of bytes copied.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut copied = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            copied += n as u64;
        }
        writer.flush().await?;
        Ok(copied)
    }

    /// Take over the raw connection. Only unframed bodies can be hijacked.
    pub fn hijack(&mut self) -> Result<BufferedConnectionStream> {
        if self.framing() != Some(BodyFraming::RawUntilClose) {
            return Err(Error::HijackNotAllowed);
        }
        self.connection.take().ok_or(Error::HijackNotAllowed)
    }

    /// Give the connection back without reading the body.
    pub(crate) fn into_connection(mut self) -> Option<BufferedConnectionStream> {
        self.connection.take()
    }
}
