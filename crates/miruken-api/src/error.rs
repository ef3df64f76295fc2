//! Messaging error types.

use thiserror::Error;

/// Errors raised by the messaging helpers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// A route was empty.
    #[error("route cannot be empty")]
    EmptyRoute,

    /// A routed batch completed without a response for a request.
    #[error("missing response for routed request")]
    MissingResponse,
}

impl From<ApiError> for miruken_core::Error {
    fn from(err: ApiError) -> Self {
        miruken_core::Error::other(err)
    }
}

/// Result type for messaging operations that fail before dispatch.
pub type ApiResult<T> = Result<T, ApiError>;
