//! The `maps` callback: bivariant transformation of a source value.
//!
//! The key is the pair `(source type, target)`, where the target is either
//! a type or a string format such as `"application/json"`. A source
//! already encoded in a format is keyed by that format instead of its type.

use std::any::Any;
use std::sync::Arc;

use crate::callback::{Callback, CallbackBase, Received};
use crate::foundation::{Key, Payload};
use crate::handle_result::HandleResult;
use crate::handler::BoxHandler;
use crate::policy::{MAPS, Policy};

/// Maps `source` into `target`.
pub struct Maps {
    source: Payload,
    target: Key,
    from: Option<String>,
    base: CallbackBase,
}

impl Maps {
    pub fn new(source: Payload, target: impl Into<Key>, many: bool) -> Self {
        Self {
            source,
            target: target.into(),
            from: None,
            base: CallbackBase::new(many),
        }
    }

    /// Maps `source` into the type `T`.
    pub fn to<T: 'static>(source: Payload) -> Self {
        Self::new(source, Key::of::<T>(), false)
    }

    /// Maps `source` into the string format `format`.
    pub fn to_format(source: Payload, format: impl Into<String>) -> Self {
        Self::new(source, Key::name(format.into()), false)
    }

    /// Reads `source`, encoded in the string format `format`, as a `T`.
    pub fn from_format<T: 'static>(source: Payload, format: impl Into<String>) -> Self {
        Self {
            from: Some(format.into()),
            ..Self::to::<T>(source)
        }
    }

    pub fn target(&self) -> &Key {
        &self.target
    }
}

impl Callback for Maps {
    fn key(&self) -> Key {
        let source = match &self.from {
            Some(format) => Key::name(format.clone()),
            None => Key::Type(self.source.key()),
        };
        Key::pair(source, self.target.clone())
    }

    fn policy(&self) -> &'static dyn Policy {
        &MAPS
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn source(&self) -> Option<Payload> {
        Some(self.source.clone())
    }

    fn receive_result(&self, result: Received, _strict: bool, _composer: &BoxHandler) -> HandleResult {
        let result = match (result, &self.target) {
            (Received::Value(payload), Key::Type(target)) => match payload.upcast(*target) {
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
