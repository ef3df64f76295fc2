//! Error types for the Miruken dispatch engine.
//!
//! Every fallible operation in the engine reports a [`Error`]. The enum is
//! `Clone` so a single failure can be shared by every awaiter of a
//! [`Deferred`](crate::Deferred) value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::validates::Outcome;

/// Errors produced while dispatching callbacks.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No matching binding accepted the callback.
    #[error("callback not handled: {callback}")]
    NotHandled {
        /// Description of the callback.
        callback: String,
    },

    /// A filter or guard vetoed the dispatch.
    #[error("callback rejected: {callback}")]
    Rejected {
        /// Description of the callback.
        callback: String,
    },

    /// A required method argument could not be resolved.
    #[error("unresolved argument {index} ({type_name}): {reason}")]
    UnresolvedArg {
        /// Position of the argument after the callback parameter.
        index: usize,
        /// Declared argument type.
        type_name: &'static str,
        /// Why resolution failed.
        reason: String,
    },

    /// A handler method could not be turned into a binding.
    #[error("invalid binding '{method}' on {owner}: {reason}")]
    MethodBinding {
        /// Type or function owning the method.
        owner: String,
        /// Method name.
        method: String,
        /// Reason the binding is invalid.
        reason: String,
    },

    /// A graph walk encountered the same node twice.
    #[error("circularity detected for node {node}")]
    TraversalCircularity {
        /// Description of the repeated node.
        node: String,
    },

    /// Cooperative cancellation was observed.
    #[error("operation canceled: {cause}")]
    Canceled {
        /// What triggered the cancellation.
        cause: Arc<Error>,
    },

    /// Structured validation failures.
    #[error("validation failed: {0}")]
    Validation(Outcome),

    /// An authorization check refused the action.
    #[error("access denied: {action}")]
    AccessDenied {
        /// The refused action.
        action: String,
    },

    /// The context owning the operation has ended.
    #[error("context has ended")]
    ContextEnded,

    /// A panic was recovered and turned into a rejection.
    #[error("panic recovered: {0}")]
    Panic(String),

    /// Several errors joined together.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    /// An error raised by user code.
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),

    /// Free-form error.
    #[error("{0}")]
    Custom(String),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Creates a custom error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Wraps an arbitrary error value.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(err))
    }

    /// Creates a not-handled error for the described callback.
    pub fn not_handled(callback: impl fmt::Display) -> Self {
        Self::NotHandled {
            callback: callback.to_string(),
        }
    }

    /// Creates a rejection for the described callback.
    pub fn rejected(callback: impl fmt::Display) -> Self {
        Self::Rejected {
            callback: callback.to_string(),
        }
    }

    /// Creates a cancellation carrying `cause`.
    pub fn canceled(cause: Error) -> Self {
        Self::Canceled {
            cause: Arc::new(cause),
        }
    }

    /// Creates an access denied error.
    pub fn access_denied(action: impl fmt::Display) -> Self {
        Self::AccessDenied {
            action: action.to_string(),
        }
    }

    /// Converts a recovered panic payload into an error.
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(err) = payload.downcast_ref::<Error>() {
            return err.clone();
        } else {
            "unknown panic".to_string()
        };
        Self::Panic(msg)
    }

    /// Joins two errors, flattening nested joins.
    pub fn join(self, other: Error) -> Error {
        let mut errors = match self {
            Error::Multiple(errors) => errors,
            err => vec![err],
        };
        match other {
            Error::Multiple(more) => errors.extend(more),
            err => errors.push(err),
        }
        Error::Multiple(errors)
    }

    /// Returns true for [`Error::NotHandled`].
    pub fn is_not_handled(&self) -> bool {
        matches!(self, Error::NotHandled { .. })
    }

    /// Returns true for [`Error::Rejected`].
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }

    /// Returns true for [`Error::UnresolvedArg`].
    pub fn is_unresolved_arg(&self) -> bool {
        matches!(self, Error::UnresolvedArg { .. })
    }

    /// Returns true for [`Error::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled { .. })
    }

    /// Returns the validation outcome if this is a validation failure.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Error::Validation(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Downcasts a wrapped [`Error::Other`] value.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Other(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<Outcome> for Error {
    fn from(outcome: Outcome) -> Self {
        Error::Validation(outcome)
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("exchange is closed")]
    struct Closed;

    #[test]
    fn test_join_flattens() {
        let err = Error::custom("a")
            .join(Error::custom("b"))
            .join(Error::custom("c"));
        match &err {
            Error::Multiple(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "a; b; c");
    }

    #[test]
    fn test_panic_payloads() {
        let err = Error::panic(Box::new("boom"));
        assert_eq!(err.to_string(), "panic recovered: boom");
        let err = Error::panic(Box::new(Error::custom("inner")));
        assert!(matches!(err, Error::Custom(ref m) if m == "inner"));
    }

    #[test]
    fn test_downcast_other() {
        let err = Error::other(Closed);
        assert!(err.downcast_ref::<Closed>().is_some());
        assert_eq!(err.to_string(), "exchange is closed");
    }
}
