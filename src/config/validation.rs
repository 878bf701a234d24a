//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate proxy URLs and certificate pairings
//! - Validate value ranges (timeouts > 0, known log levels)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - File existence is checked when the TLS configuration is built, not here

use thiserror::Error;

use crate::client::proxy::parse_proxy_url;
use crate::config::schema::ClientConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy.url {url:?} is invalid: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    #[error("tls.client_cert_path and tls.client_key_path must be set together")]
    IncompleteClientCertificate,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("observability.log_level {0:?} is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(url) = &config.proxy.url {
        if let Err(e) = parse_proxy_url(url) {
            errors.push(ValidationError::InvalidProxyUrl {
                url: url.clone(),
                reason: e.to_string(),
            });
        }
    }

    if config.tls.client_cert_path.is_some() != config.tls.client_key_path.is_some() {
        errors.push(ValidationError::IncompleteClientCertificate);
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.read_secs == Some(0) {
        errors.push(ValidationError::ZeroTimeout("read_secs"));
    }
    if config.timeouts.write_secs == Some(0) {
        errors.push(ValidationError::ZeroTimeout("write_secs"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
