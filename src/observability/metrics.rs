//! Client metrics.
//!
//! # Metrics
//! - `http_client_connections_opened_total` (counter): transports opened, by proxy mode
//! - `http_client_connections_closed_total` (counter): transports closed
//! - `http_client_responses_total` (counter): final responses by method, status
//! - `http_client_request_duration_seconds` (histogram): send latency including redirects
//! - `http_client_redirects_total` (counter): redirects followed, by kind
//! - `http_client_failures_total` (counter): failed sends, by stage
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the application installs a recorder
//! - A global switch turns recording off without touching call sites

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn metric recording on or off for the whole process.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn record_connection_opened(proxy_mode: &'static str) {
    if !is_enabled() {
        return;
    }
    metrics::counter!("http_client_connections_opened_total", "proxy_mode" => proxy_mode).increment(1);
}

pub fn record_connection_closed() {
    if !is_enabled() {
        return;
    }
    metrics::counter!("http_client_connections_closed_total").increment(1);
}

pub fn record_response(method: &str, status: u16, start_time: Instant) {
    if !is_enabled() {
        return;
    }
    metrics::counter!(
        "http_client_responses_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("http_client_request_duration_seconds").record(start_time.elapsed().as_secs_f64());
}

pub fn record_redirect(kind: &'static str) {
    if !is_enabled() {
        return;
    }
    metrics::counter!("http_client_redirects_total", "kind" => kind).increment(1);
}

pub fn record_failure(stage: &'static str) {
    if !is_enabled() {
        return;
    }
    metrics::counter!("http_client_failures_total", "stage" => stage).increment(1);
}
