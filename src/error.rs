//! Error taxonomy for the client transport.
//!
//! Every variant is fatal for the attempt that produced it. The only retry
//! performed anywhere in the crate is the explicit redirect loop.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while issuing a request or reading its response.
#[derive(Debug, Error)]
pub enum Error {
    /// DNS resolution or TCP connect failed.
    #[error("connection to {host}:{port} failed: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The proxy refused the CONNECT request or failed before answering.
    #[error("proxy tunnel negotiation failed: {reason}")]
    TunnelNegotiationFailed {
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The first response line is not `HTTP/x.y SP status ...`.
    #[error("invalid response status line: {0:?}")]
    MalformedStatusLine(String),

    /// The status token is not a plain integer in the 100..=999 range.
    ///
    /// Integers outside that range are rejected too, because
    /// [`http::StatusCode`] cannot represent them.
    #[error("invalid response status code: {0:?}")]
    MalformedStatusCode(String),

    /// A header line has no colon, a leading colon, or an unusable name/value.
    #[error("invalid response header line: {0:?}")]
    MalformedHeaderLine(String),

    /// A chunk size line is not a hexadecimal number.
    #[error("invalid chunk header: {0:?}")]
    MalformedChunkHeader(String),

    /// Chunk data was not followed by an empty line.
    #[error("chunk data was followed by {0:?} instead of an empty line")]
    MalformedChunkTrailer(String),

    /// The peer closed the connection before the promised bytes arrived.
    #[error("connection closed before the expected data was received")]
    UnexpectedEndOfStream,

    /// The response head (or a single line of it) is larger than allowed.
    #[error("response head exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// Only `http` and `https` targets can be requested.
    #[error("only http and https are supported, not {0:?}")]
    UnsupportedScheme(String),

    #[error("request target has no scheme")]
    MissingScheme,

    #[error("request target has no host")]
    MissingHost,

    #[error("request target has no port")]
    MissingPort,

    /// Body framing was resolved twice for the same response.
    #[error("response content has already been resolved")]
    AlreadyResolved,

    /// The response body is framed, so the raw connection cannot be taken over.
    #[error("response body is framed; the connection cannot be hijacked")]
    HijackNotAllowed,

    /// A multiplexed stream frame named a stream other than stdin/stdout/stderr.
    #[error("unknown multiplexed stream type {0}")]
    UnknownStreamType(u8),

    /// The TLS handshake with the origin failed.
    #[error("TLS handshake with {server_name} failed: {source}")]
    Tls {
        server_name: String,
        #[source]
        source: io::Error,
    },

    /// TLS client configuration could not be built.
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    /// The request itself cannot be serialized (bad header, bad URI, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure; the connection has been closed.
    #[error("the request failed: {source}")]
    Request {
        #[source]
        source: Box<Error>,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Strips [`Error::Request`] wrappers and descends into the cause of a
    /// failed tunnel, so cancellation and deadlines stay recognizable.
    pub fn root(&self) -> &Error {
        let mut current = self;
        loop {
            current = match current {
                Error::Request { source } => source,
                Error::TunnelNegotiationFailed {
                    source: Some(source), ..
                } => source,
                other => return other,
            };
        }
    }

    /// Wraps an error as a connection-level failure.
    pub(crate) fn request(source: Error) -> Self {
        Error::Request {
            source: Box::new(source),
        }
    }

    /// True for the errors produced by a cancellation token or a deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_nested_request_errors() {
        let err = Error::request(Error::request(Error::MalformedStatusLine("x".into())));
        assert!(matches!(err.root(), Error::MalformedStatusLine(_)));
        assert!(err.to_string().starts_with("the request failed"));
    }

    #[test]
    fn cancellation_is_visible_through_wrappers() {
        let err = Error::request(Error::Cancelled);
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[test]
    fn tunnel_failures_expose_their_cause() {
        let err = Error::TunnelNegotiationFailed {
            reason: "CONNECT a:443 failed".into(),
            source: Some(Box::new(Error::request(Error::Timeout {
                operation: "read",
                timeout: Duration::from_millis(50),
            }))),
        };
        assert!(err.is_timeout());
        assert!(matches!(err.root(), Error::Timeout { operation: "read", .. }));

        let refused = Error::TunnelNegotiationFailed {
            reason: "proxy answered 407".into(),
            source: None,
        };
        assert!(matches!(refused.root(), Error::TunnelNegotiationFailed { .. }));
    }
}
