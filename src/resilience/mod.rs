//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Every awaited transport operation:
//!     → timeouts.rs (deadline + cancellation token)
//!     → Error::Timeout / Error::Cancelled on expiry
//!     → caller drops the connection (no retries)
//! ```
//!
//! # Design Decisions
//! - Timeouts are optional per operation; unset means wait for the peer
//! - Nothing is retried automatically; the redirect loop is the only loop

pub mod timeouts;
