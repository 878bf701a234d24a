//! HTTP/1.1 wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Transport from the handler
//!     → buffered.rs (line reader, timeouts, cancellation)
//!     → connection.rs (write request, parse status line and headers)
//!     → body.rs (framing decision, lazy body reader)
//!         → chunked.rs | content_length.rs | raw until close
//!     → response.rs (handed to the caller)
//! ```
//!
//! # Design Decisions
//! - One request per connection; the body owns the connection afterwards
//! - Framing is decided once, right after the header block
//! - Unframed bodies can be hijacked for protocol upgrades (multiplexed.rs)

pub mod body;
pub mod buffered;
pub mod chunked;
pub mod connection;
pub mod content_length;
pub mod multiplexed;
pub mod request;
pub mod response;

pub use body::{BodyFraming, ResponseBodyContent};
pub use buffered::BufferedConnectionStream;
pub use connection::HttpConnection;
pub use multiplexed::{MultiplexedStream, ReadResult, TargetStream};
pub use request::{OutgoingRequest, Request, RequestBody, RequestUri};
pub use response::Response;
