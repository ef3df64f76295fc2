use std::any::Any;
use std::sync::Arc;

use crate::binding::Binding;
use crate::constraint::Constraint;
use crate::foundation::{Key, Payload};
use crate::handle_result::HandleResult;
use crate::handler::BoxHandler;
use crate::policy::Policy;

use super::{Callback, CallbackBase, CallbackRef, DispatchGuard, Received};

/// Marks a callback forwarded through a composition scope.
///
/// Every handler unwraps it before matching, so the wrapper only tells the
/// receiving side that the callback came through another composer.
pub struct Composition {
    callback: CallbackRef,
    batch: bool,
}

impl Composition {
    pub fn new(callback: CallbackRef) -> Self {
        let batch = callback
            .downcast_ref::<Composition>()
            .is_none_or(|composition| composition.batch);
        Self {
            callback: Self::unwrap(&callback),
            batch,
        }
    }

    /// Wraps `callback` so batching handlers pass it through.
    pub fn without_batch(callback: CallbackRef) -> Self {
        Self {
            batch: false,
            ..Self::new(callback)
        }
    }

    pub fn callback(&self) -> &CallbackRef {
        &self.callback
    }

    /// The wrapped callback, or `callback` itself when it is not wrapped.
    pub fn unwrap(callback: &CallbackRef) -> CallbackRef {
        match callback.downcast_ref::<Composition>() {
            Some(composition) => composition.callback.clone(),
            None => callback.clone(),
        }
    }
}

impl Callback for Composition {
    fn key(&self) -> Key {
        self.callback.key()
    }

    fn policy(&self) -> &'static dyn Policy {
        self.callback.policy()
    }

    fn base(&self) -> &CallbackBase {
        self.callback.base()
    }

    fn source(&self) -> Option<Payload> {
        self.callback.source()
    }

    fn constraints(&self) -> &[Arc<dyn Constraint>] {
        self.callback.constraints()
    }

    fn receive_result(&self, result: Received, strict: bool, composer: &BoxHandler) -> HandleResult {
        self.callback.receive_result(result, strict, composer)
    }

    fn dispatch_receiver(&self, receiver: &Payload, greedy: bool, composer: &BoxHandler) -> HandleResult {
        self.callback.dispatch_receiver(receiver, greedy, composer)
    }

    fn can_infer(&self) -> bool {
        self.callback.can_infer()
    }

    fn can_filter(&self) -> bool {
        self.callback.can_filter()
    }

    fn can_batch(&self) -> bool {
        self.batch && self.callback.can_batch()
    }

    fn can_dispatch(&self, receiver: Option<&Payload>, binding: &Arc<Binding>) -> Option<DispatchGuard> {
        self.callback.can_dispatch(receiver, binding)
    }

    fn describe(&self) -> String {
        self.callback.describe()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
