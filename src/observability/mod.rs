//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields, connection ids)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stderr, pretty or JSON)
//!     → whatever `metrics` recorder the application installs
//! ```
//!
//! # Design Decisions
//! - The library only emits; subscribers and recorders belong to the binary
//! - Metrics are cheap (atomic increments) and can be switched off

pub mod logging;
pub mod metrics;
