//! Outgoing request model.
//!
//! # Responsibilities
//! - Describe what the caller wants to send (method, target, headers, body)
//! - Carry an optional target hint for relative URIs (Unix-socket endpoints)
//! - Decide whether a body can be replayed on redirect
//!
//! # Design Decisions
//! - Header names are case-insensitive and multi-valued (`http::HeaderMap`)
//! - The handler never mutates the caller's URI in place; it rebuilds a
//!   resolved target for every attempt

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Version};
use tokio::io::AsyncRead;
use url::Url;

use crate::client::target::{Scheme, TargetHint};
use crate::error::{Error, Result};

/// The request target as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestUri {
    Absolute(Url),
    /// Path and query, resolved against the request's [`TargetHint`].
    Relative(String),
}

impl RequestUri {
    /// Parse an absolute URL, or keep the text as a relative reference.
    pub fn parse(input: &str) -> Self {
        match Url::parse(input) {
            Ok(url) => RequestUri::Absolute(url),
            Err(_) => RequestUri::Relative(input.to_owned()),
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, RequestUri::Absolute(_))
    }
}

impl From<Url> for RequestUri {
    fn from(url: Url) -> Self {
        RequestUri::Absolute(url)
    }
}

impl From<&str> for RequestUri {
    fn from(input: &str) -> Self {
        RequestUri::parse(input)
    }
}

impl From<String> for RequestUri {
    fn from(input: String) -> Self {
        RequestUri::parse(&input)
    }
}

impl fmt::Display for RequestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestUri::Absolute(url) => write!(f, "{}", url),
            RequestUri::Relative(path) => write!(f, "{}", path),
        }
    }
}

/// Request body source.
pub enum RequestBody {
    Empty,
    /// In-memory body with a known length. Can be replayed.
    Bytes(Bytes),
    /// Streamed body. Sent chunked when `length` is unknown.
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        length: Option<u64>,
    },
}

impl RequestBody {
    pub fn stream<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        RequestBody::Stream {
            reader: Box::new(reader),
            length,
        }
    }

    /// `None` means the length is unknown and the body goes out chunked.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// A copy for the next redirect attempt. Streams cannot be replayed.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Bytes(bytes) => Some(RequestBody::Bytes(bytes.clone())),
            RequestBody::Stream { .. } => None,
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish_non_exhaustive()
            }
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// A request handed to the managed handler.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub uri: RequestUri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub hint: TargetHint,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<RequestUri>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            hint: TargetHint::default(),
        }
    }

    pub fn get(uri: impl Into<RequestUri>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<RequestUri>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Append a header. An invalid name or value fails here with `InvalidRequest`.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("invalid header name {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidRequest(format!("invalid value for header {}", name)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// HTTP/1.0 and HTTP/1.1 are supported on the wire.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.hint.scheme = Some(scheme);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hint.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.hint.port = Some(port);
        self
    }
}

/// One serialized exchange as seen by `HttpConnection`.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    /// Request-line target: origin-form or absolute-form.
    pub address_line: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl OutgoingRequest {
    pub fn new(method: Method, address_line: impl Into<String>) -> Self {
        Self {
            method,
            address_line: address_line.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }
}
