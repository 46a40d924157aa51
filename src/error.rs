//! Error types for Mousho

use std::io;
use thiserror::Error;

/// Result type alias for Mousho operations
pub type Result<T> = std::result::Result<T, MoushoError>;

/// Errors raised by the monitor, its sources and its collaborators
#[derive(Error, Debug)]
pub enum MoushoError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unsupported platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Invalid value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Command failed
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for MoushoError {
    fn from(err: toml::de::Error) -> Self {
        MoushoError::Parse(format!("Failed to parse TOML: {}", err))
    }
}

impl From<serde_json::Error> for MoushoError {
    fn from(err: serde_json::Error) -> Self {
        MoushoError::Parse(format!("Failed to parse JSON: {}", err))
    }
}

impl From<::notify::Error> for MoushoError {
    fn from(err: ::notify::Error) -> Self {
        MoushoError::Other(format!("File watch error: {}", err))
    }
}
