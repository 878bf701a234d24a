//! Single-use HTTP/1.1 exchange over a buffered stream.
//!
//! # Responsibilities
//! - Serialize the request line, headers and body
//! - Parse the status line and header block
//! - Split content headers from response headers
//! - Resolve body framing and hand the stream to the response content
//!
//! # Design Decisions
//! - Body framing headers are always computed, never taken from the caller
//! - Every failure drops the stream, closing the transport
//! - The response head is capped at 64 KiB

use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Version};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::http::body::{BodyFraming, ResponseBodyContent};
use crate::http::buffered::BufferedConnectionStream;
use crate::http::chunked::ChunkedEncoder;
use crate::http::request::{OutgoingRequest, RequestBody};
use crate::http::response::Response;
use crate::resilience::timeouts::guarded;

/// Upper bound for the status line plus all header lines.
pub const MAX_HEAD_LENGTH: usize = 64 * 1024;

const BODY_PIECE: usize = 8 * 1024;

/// Parsed response head.
#[derive(Debug)]
struct ResponseHead {
    version: Version,
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    content_headers: HeaderMap,
}

/// One request, one response, then the connection belongs to the body.
#[derive(Debug)]
pub struct HttpConnection {
    stream: BufferedConnectionStream,
}

impl HttpConnection {
    pub fn new(stream: BufferedConnectionStream) -> Self {
        Self { stream }
    }

    /// Write `request`, then read the response head.
    ///
    /// On failure the connection is closed and the error is wrapped as
    /// [`Error::Request`].
    pub async fn send(mut self, request: OutgoingRequest, cancel: &CancellationToken) -> Result<Response> {
        let method = request.method.clone();
        let address_line = request.address_line.clone();

        if let Err(e) = self.write_request(request, cancel).await {
            tracing::debug!(method = %method, address = %address_line, error = %e, "Failed to send request");
            return Err(Error::request(e));
        }

        let head = match self.read_head(cancel).await {
            Ok(head) => head,
            Err(e) => {
                tracing::debug!(method = %method, address = %address_line, error = %e, "Failed to read response head");
                return Err(Error::request(e));
            }
        };

        let framing = BodyFraming::detect(&head.headers, &head.content_headers);
        tracing::debug!(
            method = %method,
            address = %address_line,
            status = head.status.as_u16(),
            framing = ?framing,
            "Response head received"
        );

        let mut content = ResponseBodyContent::new(self.stream, head.content_headers, cancel.clone());
        content.resolve(framing).map_err(Error::request)?;

        Ok(Response {
            status: head.status,
            reason: head.reason,
            version: head.version,
            headers: head.headers,
            content,
            target: None,
        })
    }

    async fn write_request(&mut self, request: OutgoingRequest, cancel: &CancellationToken) -> Result<()> {
        let OutgoingRequest {
            method,
            address_line,
            version,
            headers,
            body,
        } = request;

        let version = version_str(version)?;
        let mut head = BytesMut::with_capacity(256);
        head.extend_from_slice(method.as_str().as_bytes());
        head.extend_from_slice(b" ");
        head.extend_from_slice(address_line.as_bytes());
        head.extend_from_slice(b" ");
        head.extend_from_slice(version.as_bytes());
        head.extend_from_slice(b"\r\n");

        for (name, value) in headers.iter() {
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
                continue;
            }
            push_header(&mut head, &title_case(name.as_str()), value.as_bytes());
        }

        let length = body.known_length();
        match (&body, length) {
            (RequestBody::Empty, _) => {}
            (_, Some(length)) => push_header(&mut head, "Content-Length", length.to_string().as_bytes()),
            (_, None) => push_header(&mut head, "Transfer-Encoding", b"chunked"),
        }
        head.extend_from_slice(b"\r\n");

        self.stream.write_all(&head, cancel).await?;
        tracing::trace!(method = %method, address = %address_line, "Request head written");

        match body {
            RequestBody::Empty => {}
            RequestBody::Bytes(bytes) => self.stream.write_all(&bytes, cancel).await?,
            RequestBody::Stream { mut reader, length } => {
                let mut buf = vec![0u8; BODY_PIECE];
                match length {
                    Some(expected) => {
                        let mut sent = 0u64;
                        while sent < expected {
                            let want = (expected - sent).min(BODY_PIECE as u64) as usize;
                            let n = guarded("read body", cancel, None, reader.read(&mut buf[..want])).await?;
                            if n == 0 {
                                return Err(Error::InvalidRequest(format!(
                                    "request body ended after {} of {} bytes",
                                    sent, expected
                                )));
                            }
                            self.stream.write_all(&buf[..n], cancel).await?;
                            sent += n as u64;
                        }
                    }
                    None => {
                        let mut encoder = ChunkedEncoder::new(&mut self.stream);
                        loop {
                            let n = guarded("read body", cancel, None, reader.read(&mut buf)).await?;
                            if n == 0 {
                                break;
                            }
                            encoder.write(&buf[..n], cancel).await?;
                        }
                        encoder.end_of_body(cancel).await?;
                    }
                }
            }
        }

        self.stream.flush(cancel).await
    }

    async fn read_head(&mut self, cancel: &CancellationToken) -> Result<ResponseHead> {
        let status_line = self.stream.read_line(cancel).await?;
        let mut total = status_line.len() + 2;
        let (version, status, reason) = parse_status_line(&status_line)?;

        let mut headers = HeaderMap::new();
        let mut content_headers = HeaderMap::new();
        loop {
            let line = self.stream.read_line(cancel).await?;
            if line.is_empty() {
                break;
            }
            total += line.len() + 2;
            if total > MAX_HEAD_LENGTH {
                return Err(Error::HeaderTooLarge(MAX_HEAD_LENGTH));
            }

            let (name, value) = parse_header_line(&line)?;
            if is_content_header(&name) {
                content_headers.append(name, value);
            } else {
                headers.append(name, value);
            }
        }

        Ok(ResponseHead {
            version,
            status,
            reason,
            headers,
            content_headers,
        })
    }
}

fn version_str(version: Version) -> Result<&'static str> {
    match version {
        Version::HTTP_10 => Ok("HTTP/1.0"),
        Version::HTTP_11 => Ok("HTTP/1.1"),
        other => Err(Error::InvalidRequest(format!("unsupported HTTP version {:?}", other))),
    }
}

fn push_header(head: &mut BytesMut, name: &str, value: &[u8]) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value);
    head.extend_from_slice(b"\r\n");
}

/// `x-registry-auth` -> `X-Registry-Auth`.
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}

/// Codes outside 100..=999 are `MalformedStatusCode`; `StatusCode` has no room for them.
fn parse_status_line(line: &str) -> Result<(Version, StatusCode, Option<String>)> {
    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next().unwrap_or_default();
    let code = match parts.next() {
        Some(code) if protocol.starts_with("HTTP/") => code,
        _ => return Err(Error::MalformedStatusLine(line.to_owned())),
    };

    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedStatusCode(code.to_owned()));
    }
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::MalformedStatusCode(code.to_owned()))?;

    let version = match protocol {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/2" | "HTTP/2.0" => Version::HTTP_2,
        _ => Version::HTTP_11,
    };
    let reason = parts
        .next()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_owned);

    Ok((version, status, reason))
}

fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue)> {
    let malformed = || Error::MalformedHeaderLine(line.to_owned());
    let colon = match line.find(':') {
        Some(index) if index > 0 => index,
        _ => return Err(malformed()),
    };

    let name = HeaderName::from_bytes(line[..colon].as_bytes()).map_err(|_| malformed())?;
    // Lines were decoded as Latin-1, so every char fits in a byte.
    let value: Vec<u8> = line[colon + 1..].trim().chars().map(|c| c as u8).collect();
    let value = HeaderValue::from_bytes(&value).map_err(|_| malformed())?;
    Ok((name, value))
}

fn is_content_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("content-") || name == "allow" || name == "expires" || name == "last-modified"
}
