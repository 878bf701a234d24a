//! `ClientConfig` and its sections.
//!
//! Every section is `#[serde(default)]`, so an empty file is a valid config.
//! Durations are whole seconds; an absent timeout means no deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::redirect::RedirectMode;

/// Root configuration for the managed HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Proxy selection.
    pub proxy: ProxyConfig,

    /// Automatic redirect handling.
    pub redirects: RedirectConfig,

    /// TLS trust and client certificates.
    pub tls: TlsConfig,

    /// Per-operation deadlines.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Master switch. When false every request connects directly.
    pub enabled: bool,

    /// Proxy for all schemes (e.g., "http://proxy.local:3128").
    pub url: Option<String>,

    /// Comma-separated bypass list, `NO_PROXY` syntax.
    pub no_proxy: String,

    /// Read `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY` when `url` is unset.
    pub from_env: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            no_proxy: String::new(),
            from_env: true,
        }
    }
}

/// Redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Maximum number of redirects followed per request.
    pub max_automatic: u32,

    /// Which redirects are followed.
    pub mode: RedirectMode,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_automatic: 20,
            mode: RedirectMode::NoDowngrade,
        }
    }
}

/// TLS configuration for outgoing connections.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Extra trusted CA certificates (PEM).
    pub ca_cert_path: Option<String>,

    /// Client certificate chain (PEM).
    pub client_cert_path: Option<String>,

    /// Private key for the client certificate (PEM).
    pub client_key_path: Option<String>,

    /// Accept any server certificate. Testing only.
    pub accept_invalid_certs: bool,
}

/// Deadlines for connecting (including the TLS handshake), reading and writing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout, including the TLS handshake.
    pub connect_secs: u64,

    /// Per-read timeout. Unset waits indefinitely.
    pub read_secs: Option<u64>,

    /// Per-write timeout. Unset waits indefinitely.
    pub write_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            read_secs: None,
            write_secs: None,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.connect_secs))
    }

    pub fn read(&self) -> Option<Duration> {
        self.read_secs.map(Duration::from_secs)
    }

    pub fn write(&self) -> Option<Duration> {
        self.write_secs.map(Duration::from_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging and metrics switches, consumed by the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`. `RUST_LOG` overrides it.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Record client metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}
