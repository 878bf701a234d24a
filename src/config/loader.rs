//! Reading `ClientConfig` from TOML.

use std::fs;
use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Why a configuration could not be loaded.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The text is not valid TOML for [`ClientConfig`].
    Parse(toml::de::Error),
    /// Parsed, but semantically wrong. Every problem found is listed.
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration: {}", e),
            ConfigError::Parse(e) => write!(f, "invalid TOML: {}", e),
            ConfigError::Validation(errors) => {
                let problems: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "invalid configuration: {}", problems.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Read `path`, then parse and validate it.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    fs::read_to_string(path)
        .map_err(ConfigError::Io)
        .and_then(|content| parse_config(&content))
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    match validate_config(&config) {
        Ok(()) => Ok(config),
        Err(problems) => Err(ConfigError::Validation(problems)),
    }
}
