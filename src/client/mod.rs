//! Client orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → target.rs (scheme, host, port, path per attempt)
//!     → proxy.rs (route: direct | HTTP proxy | CONNECT tunnel)
//!     → handler.rs (transport, tunnel, TLS, exchange)
//!     → redirect.rs (follow 301/302 or return)
//! ```
//!
//! # Design Decisions
//! - Attempt state is rebuilt from scratch; nothing derived is cached on the request
//! - Policy (proxy selection, redirects) is separate from mechanics (handler)

pub mod handler;
pub mod proxy;
pub mod redirect;
pub mod target;

pub use handler::ManagedHandler;
pub use proxy::{EnvProxy, NoProxy, Proxy, ProxyMode, ProxySelector, Route};
pub use redirect::RedirectMode;
pub use target::{ResolvedTarget, Scheme, TargetHint};
