//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Handler needs a transport to host:port
//!     → opener.rs (TCP, Unix socket, or caller closure)
//!     → connection.rs (open/close accounting, connection id)
//!     → tls.rs (optional client-side TLS upgrade)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Every transport is a boxed duplex stream so layers stack freely
//! - Openers and TLS upgraders are injectable traits
//! - No pooling: a transport serves exactly one request

pub mod connection;
pub mod opener;
pub mod tls;
