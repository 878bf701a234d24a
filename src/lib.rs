//! HTTP/1.1 client transport over raw byte streams.
//!
//! Requests go out over a fresh transport each time: direct, through an HTTP
//! proxy, or through a `CONNECT` tunnel, with TLS where the target asks for it.
//! Responses are decoded as chunked, length-bounded or read-until-close, and
//! unframed responses can be hijacked for protocol upgrades.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod observability;
pub mod resilience;

#[cfg(test)]
mod test_support;

pub use client::{ManagedHandler, ProxyMode, RedirectMode, ResolvedTarget, Scheme, TargetHint};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use crate::http::{BodyFraming, Request, RequestBody, RequestUri, Response, ResponseBodyContent};
pub use net::opener::{BoxedTransport, StreamOpener, TcpOpener};
pub use net::tls::{RustlsUpgrader, TlsUpgrader};
