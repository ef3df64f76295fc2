//! Typed options carried by the handler chain.
//!
//! Any `Merge` type can be attached to a handler with
//! [`OptionsLayer`](crate::handler::OptionsLayer). Looking options up
//! dispatches an [`OptionsRequest`] greedily; every decorator on the way
//! merges its value in, and values already set are kept, so the outermost
//! decorator takes precedence.
//!
//! ```rust,ignore
//! #[derive(Clone, Default)]
//! struct RetryOptions { attempts: Option<u32> }
//!
//! impl Merge for RetryOptions {
//!     fn merge(&mut self, other: &Self) {
//!         self.attempts = self.attempts.or(other.attempts);
//!     }
//! }
//!
//! let handler = handler.layer(OptionsLayer::new(RetryOptions { attempts: Some(3) }));
//! let options = get_options::<RetryOptions>(&handler);
//! ```

use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::binding::{Arg, ArgKind, ArgSpec, FromDispatch};
use crate::callback::{Callback, CallbackBase, CallbackRef, Composition};
use crate::error::{Error, Result};
use crate::foundation::Key;
use crate::handle_context::HandleContext;
use crate::handle_result::HandleResult;
use crate::handler::{BoxHandler, Handler};
use crate::policy::{OPTIONS, Policy};

/// Options that can be layered: unset fields are filled from `other`.
pub trait Merge: Clone + Default + Send + Sync + 'static {
    fn merge(&mut self, other: &Self);
}

// ============================================================================
// OptionsRequest
// ============================================================================

/// Collects the options of type `T` visible from a handler.
pub struct OptionsRequest<T> {
    base: CallbackBase,
    value: Mutex<T>,
}

impl<T: Merge> OptionsRequest<T> {
    pub fn new() -> Self {
        Self {
            base: CallbackBase::default(),
            value: Mutex::new(T::default()),
        }
    }

    pub fn merge(&self, other: &T) {
        self.value.lock().merge(other);
    }

    pub fn value(&self) -> T {
        self.value.lock().clone()
    }
}

impl<T: Merge> Default for OptionsRequest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Merge> Callback for OptionsRequest<T> {
    fn key(&self) -> Key {
        Key::of::<T>()
    }

    fn policy(&self) -> &'static dyn Policy {
        &OPTIONS
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn can_infer(&self) -> bool {
        false
    }

    fn can_filter(&self) -> bool {
        false
    }

    fn can_batch(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Looks up the merged options of type `T`, or `None` when no handler on
/// the chain carries any.
pub fn get_options<T: Merge>(handler: &BoxHandler) -> Option<T> {
    let request = Arc::new(OptionsRequest::<T>::new());
    let callback: CallbackRef = request.clone();
    handler
        .handle(&callback, true, handler)
        .is_handled()
        .then(|| request.value())
}

// ============================================================================
// WithOptions
// ============================================================================

/// Decorates a handler with an options value.
pub struct WithOptions<T> {
    inner: BoxHandler,
    options: T,
}

impl<T: Merge> WithOptions<T> {
    pub fn new(inner: BoxHandler, options: T) -> Self {
        Self { inner, options }
    }
}

impl<T: Merge> Handler for WithOptions<T> {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let unwrapped = Composition::unwrap(callback);
        match unwrapped.downcast_ref::<OptionsRequest<T>>() {
            Some(request) => {
                request.merge(&self.options);
                HandleResult::HANDLED.or(self.inner.handle(callback, greedy, composer))
            }
            None => self.inner.handle(callback, greedy, composer),
        }
    }
}

// ============================================================================
// Options argument
// ============================================================================

/// Handler parameter receiving the merged options of type `T`.
#[derive(Clone)]
pub struct Options<T>(pub Arc<T>);

impl<T> Deref for Options<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Merge> FromDispatch for Options<T> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Options)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        get_options::<T>(ctx.composer())
            .map(|options| Arg::Ready(Options(Arc::new(options))))
            .ok_or_else(|| Error::UnresolvedArg {
                index,
                type_name: std::any::type_name::<T>(),
                reason: "no options available".to_string(),
            })
    }
}
