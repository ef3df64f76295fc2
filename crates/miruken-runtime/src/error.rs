//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while setting up, starting or stopping an application.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A feature failed to install.
    #[error("feature '{feature}' failed to install: {reason}")]
    Install { feature: String, reason: String },

    /// Several features failed to install.
    #[error("{} features failed to install: {}", .0.len(), join(.0))]
    Features(Vec<RuntimeError>),

    /// Dispatch failed while building or bootstrapping.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] miruken_core::Error),

    /// A bootstrap did not start.
    #[error("bootstrap '{name}' failed to start: {source}")]
    Startup {
        name: String,
        source: miruken_core::Error,
    },

    /// A bootstrap did not stop cleanly.
    #[error("bootstrap '{name}' failed to shut down: {source}")]
    Shutdown {
        name: String,
        source: miruken_core::Error,
    },

    /// Startup did not complete in time.
    #[error("startup did not complete within {0:?}")]
    StartupTimeout(Duration),

    /// Shutdown did not complete in time.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl RuntimeError {
    /// Creates an install error for `feature`.
    pub fn install(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Install {
            feature: feature.into(),
            reason: reason.into(),
        }
    }
}

fn join(errors: &[RuntimeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
