//! Connection identity and open/close accounting.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count transports opened and currently open per handler
//! - Close accounting happens on drop, so every exit path is covered

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::opener::BoxedTransport;
use crate::observability::metrics;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-wide transport number, shown as `conn-N` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks the transports opened by one handler.
///
/// Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Transports currently open.
    active: Arc<AtomicU64>,
    /// Transports ever opened.
    opened: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a transport as open until the returned guard is dropped.
    pub fn track(&self) -> ConnectionGuard {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            id: ConnectionId::next(),
            active: Arc::clone(&self.active),
        }
    }

    /// Transports not yet dropped. Zero once every response is gone.
    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wrap a transport so its lifetime is accounted for.
    pub fn wrap(&self, inner: BoxedTransport) -> TrackedTransport {
        TrackedTransport {
            inner,
            guard: self.track(),
        }
    }
}

/// Open-transport token; releases its slot in the tracker on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    active: Arc<AtomicU64>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        metrics::record_connection_closed();
        tracing::trace!(connection_id = %self.id, "Transport released");
    }
}

/// A transport whose drop is observed by a [`ConnectionTracker`].
pub struct TrackedTransport {
    inner: BoxedTransport,
    guard: ConnectionGuard,
}

impl TrackedTransport {
    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }
}

impl AsyncRead for TrackedTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
