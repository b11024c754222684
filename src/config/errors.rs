//! Error types for configuration and preference storage.

use thiserror::Error;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Preference file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Preference file is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
