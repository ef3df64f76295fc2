//! The `handles` callback: contravariant command and event dispatch.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase, CallbackRef, Resolution};
use crate::constraint::Constraint;
use crate::error::{Error, Result};
use crate::foundation::{Key, Payload};
use crate::handler::{BoxHandler, dispatch};
use crate::policy::{HANDLES, Policy};

/// Offers a message to every binding declared for its type or an ancestor.
pub struct Handles {
    message: Payload,
    base: CallbackBase,
}

impl Handles {
    pub fn new<M: Send + Sync + 'static>(message: M) -> Self {
        Self::from_payload(Payload::new(message))
    }

    pub fn shared<M: Send + Sync + 'static>(message: Arc<M>) -> Self {
        Self::from_payload(Payload::from_arc(message))
    }

    pub fn from_payload(message: Payload) -> Self {
        Self {
            message,
            base: CallbackBase::new(false),
        }
    }

    /// Requires bindings to satisfy `constraints`.
    pub fn with_constraints(mut self, constraints: Vec<Arc<dyn Constraint>>) -> Self {
        self.base = CallbackBase::new(false).with_constraints(constraints);
        self
    }

    pub fn message(&self) -> &Payload {
        &self.message
    }

    /// Dispatches the message through `handler` and returns every response.
    ///
    /// Fails with [`Error::NotHandled`] when no binding accepted it.
    pub fn execute(self: Arc<Self>, handler: &BoxHandler, greedy: bool) -> Result<Resolution<Vec<Payload>>> {
        let callback: CallbackRef = self.clone();
        let result = dispatch(handler, &callback, greedy);
        let handled = result.is_handled();
        if let Some(err) = result.into_error() {
            return Err(err);
        }
        if !handled {
            return Err(Error::not_handled(callback.describe()));
        }
        Ok(self.base.results())
    }
}

impl Callback for Handles {
    fn key(&self) -> Key {
        Key::Type(self.message.key())
    }

    fn policy(&self) -> &'static dyn Policy {
        &HANDLES
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn source(&self) -> Option<Payload> {
        Some(self.message.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
