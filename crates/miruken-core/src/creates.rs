//! The `creates` callback: covariant construction.
//!
//! Unlike [`Provides`](crate::provides::Provides), a create request is never
//! answered by an existing handler instance; only constructor and factory
//! bindings registered under the creates policy can satisfy it.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase, Received};
use crate::foundation::{Key, Payload};
use crate::handle_result::HandleResult;
use crate::handler::BoxHandler;
use crate::policy::{CREATES, Policy};

/// Requests a new value assignable to a key.
pub struct Creates {
    key: Key,
    base: CallbackBase,
}

impl Creates {
    pub fn new(key: impl Into<Key>, many: bool) -> Self {
        Self {
            key: key.into(),
            base: CallbackBase::new(many),
        }
    }

    pub fn of<T: 'static>() -> Self {
        Self::new(Key::of::<T>(), false)
    }
}

impl Callback for Creates {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> &'static dyn Policy {
        &CREATES
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn receive_result(&self, result: Received, _strict: bool, _composer: &BoxHandler) -> HandleResult {
        let result = match (result, &self.key) {
            (Received::Value(payload), Key::Type(key)) => match payload.upcast(*key) {
                Some(payload) => Received::Value(payload),
                None => return HandleResult::NOT_HANDLED,
            },
            (result, _) => result,
        };
        self.base.add(result);
        HandleResult::HANDLED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Creates {
    /// Every value created so far.
    pub fn created(&self) -> Vec<Payload> {
        self.base.results().ready().unwrap_or_default()
    }
}
