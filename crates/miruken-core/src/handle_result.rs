//! Outcome of offering a callback to a handler.

use std::fmt;

use crate::error::Error;

/// Whether a callback was handled, whether dispatch must stop and any error
/// raised along the way.
#[derive(Debug, Clone)]
pub struct HandleResult {
    handled: bool,
    stop: bool,
    error: Option<Error>,
}

impl HandleResult {
    pub const HANDLED: HandleResult = HandleResult::new(true, false);
    pub const HANDLED_AND_STOP: HandleResult = HandleResult::new(true, true);
    pub const NOT_HANDLED: HandleResult = HandleResult::new(false, false);
    pub const NOT_HANDLED_AND_STOP: HandleResult = HandleResult::new(false, true);

    const fn new(handled: bool, stop: bool) -> Self {
        Self {
            handled,
            stop,
            error: None,
        }
    }

    /// [`HANDLED`](Self::HANDLED) or [`NOT_HANDLED`](Self::NOT_HANDLED).
    pub fn from_handled(handled: bool) -> Self {
        if handled {
            Self::HANDLED
        } else {
            Self::NOT_HANDLED
        }
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn is_stop(&self) -> bool {
        self.stop
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn into_error(self) -> Option<Error> {
        self.error
    }

    /// Returns true when a non-greedy dispatch should not go further.
    pub fn should_stop(&self, greedy: bool) -> bool {
        self.stop || (self.handled && !greedy)
    }

    /// Attaches an error and stops dispatching.
    pub fn with_error(self, err: Error) -> Self {
        Self {
            handled: self.handled,
            stop: true,
            error: Some(match self.error {
                Some(existing) => existing.join(err),
                None => err,
            }),
        }
    }

    /// Handled if either side is handled.
    pub fn or(self, other: HandleResult) -> Self {
        Self {
            handled: self.handled || other.handled,
            stop: self.stop || other.stop,
            error: join(self.error, other.error),
        }
    }

    /// Handled only if both sides are handled.
    pub fn and(self, other: HandleResult) -> Self {
        Self {
            handled: self.handled && other.handled,
            stop: self.stop || other.stop,
            error: join(self.error, other.error),
        }
    }

    /// Combines with `block` unless dispatch already stopped.
    pub fn then(self, block: impl FnOnce() -> HandleResult) -> Self {
        if self.stop { self } else { self.or(block()) }
    }

    /// Combines with `block` when `condition` holds and dispatch did not stop.
    pub fn then_if(self, condition: bool, block: impl FnOnce() -> HandleResult) -> Self {
        if self.stop || !condition {
            self
        } else {
            self.or(block())
        }
    }

    /// Falls back to `block` when neither handled nor stopped.
    pub fn otherwise(self, block: impl FnOnce() -> HandleResult) -> Self {
        if self.handled || self.stop {
            self
        } else {
            block()
        }
    }

    /// Falls back to `block` when not handled, or always when `condition`
    /// holds.
    pub fn otherwise_if(self, condition: bool, block: impl FnOnce() -> HandleResult) -> Self {
        if (self.handled || self.stop) && !condition {
            self
        } else {
            self.or(block())
        }
    }

    /// Marks the result handled if `handled` is true.
    pub fn otherwise_handled_if(self, handled: bool) -> Self {
        if self.handled || self.stop || !handled {
            self
        } else {
            self.or(Self::HANDLED)
        }
    }
}

fn join(left: Option<Error>, right: Option<Error>) -> Option<Error> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.join(r)),
        (l, r) => l.or(r),
    }
}

impl Default for HandleResult {
    fn default() -> Self {
        Self::NOT_HANDLED
    }
}

impl fmt::Display for HandleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.handled, self.stop) {
            (true, false) => "handled",
            (true, true) => "handled and stop",
            (false, false) => "not handled",
            (false, true) => "not handled and stop",
        };
        match &self.error {
            Some(err) => write!(f, "{state} ({err})"),
            None => f.write_str(state),
        }
    }
}
