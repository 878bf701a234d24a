//! Transport establishment.
//!
//! # Responsibilities
//! - Define the duplex transport type every layer above works with
//! - Define the injectable stream opener capability
//! - Provide the default TCP opener (resolve, then try each address)
//! - Provide a Unix domain socket opener for local daemons

use std::future::Future;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream that can carry HTTP/1.1.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens a raw transport to `host:port`.
///
/// The handler calls this with the *connection* target, which is the proxy
/// when one is in use.
pub trait StreamOpener: Send + Sync {
    fn open<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>>;
}

impl<F, Fut> StreamOpener for F
where
    F: Fn(String, u16) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<BoxedTransport>> + Send + 'static,
{
    fn open<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(self(host.to_owned(), port))
    }
}

/// Default opener: DNS resolution followed by a TCP connect to each address.
#[derive(Debug, Clone)]
pub struct TcpOpener {
    nodelay: bool,
}

impl TcpOpener {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Enable or disable `TCP_NODELAY` on connected sockets.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let addresses: Vec<_> = tokio::net::lookup_host((host, port)).await?.collect();
        if addresses.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve address for {}", host),
            ));
        }

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    stream.set_nodelay(self.nodelay)?;
                    tracing::trace!(host, %address, "TCP connection established");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(host, %address, error = %e, "Connect attempt failed, trying next address");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address connected")))
    }
}

impl Default for TcpOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamOpener for TcpOpener {
    fn open<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let stream = self.connect(host, port).await?;
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}

/// Connects every request to a fixed Unix domain socket.
///
/// Host and port only shape the request line and `Host` header.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixSocketOpener {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
impl StreamOpener for UnixSocketOpener {
    fn open<'a>(&'a self, _host: &'a str, _port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(&self.path).await?;
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}
