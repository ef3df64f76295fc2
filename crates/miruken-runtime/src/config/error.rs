//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or binding configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file extension has no enabled format.
    #[error("unsupported or disabled configuration format: .{0}")]
    UnsupportedFormat(String),

    /// The layered sources could not be extracted into the target type.
    #[error("failed to extract configuration: {0}")]
    Extract(#[from] figment::Error),

    /// A section could not be bound.
    #[error("failed to bind configuration section '{path}': {reason}")]
    Section { path: String, reason: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    ValidationError { message: String },

    /// Missing required field.
    #[error("missing required configuration field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a section binding error.
    pub fn section(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Section {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
