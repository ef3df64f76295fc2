//! Callbacks and their shared result storage.
//!
//! A [`Callback`] names a [`Policy`] and a [`Key`]; the dispatcher offers it
//! to handlers whose bindings match. Accepted results accumulate in the
//! callback's [`CallbackBase`], either as ready payloads or as deferred
//! values that complete later.

mod composition;
mod resolution;

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::binding::Binding;
use crate::constraint::Constraint;
use crate::foundation::{Deferred, Key, Payload};
use crate::handle_result::HandleResult;
use crate::handler::BoxHandler;
use crate::policy::Policy;

pub use composition::Composition;
pub use resolution::Resolution;

/// Shared handle to a callback.
pub type CallbackRef = Arc<dyn Callback>;

/// A result offered to a callback.
#[derive(Clone, Debug)]
pub enum Received {
    Value(Payload),
    Pending(Deferred<Vec<Payload>>),
}

/// A self-describing request dispatched through handlers.
pub trait Callback: Any + Send + Sync {
    fn key(&self) -> Key;

    fn policy(&self) -> &'static dyn Policy;

    fn base(&self) -> &CallbackBase;

    /// The value the callback carries, if any.
    fn source(&self) -> Option<Payload> {
        None
    }

    /// Constraints a binding must satisfy to accept this callback.
    fn constraints(&self) -> &[Arc<dyn Constraint>] {
        self.base().constraints()
    }

    /// Accepts a result produced by a binding.
    fn receive_result(
        &self,
        result: Received,
        _strict: bool,
        _composer: &BoxHandler,
    ) -> HandleResult {
        self.base().add(result);
        HandleResult::HANDLED
    }

    /// Offers the receiver itself as a result before its bindings run.
    fn dispatch_receiver(
        &self,
        _receiver: &Payload,
        _greedy: bool,
        _composer: &BoxHandler,
    ) -> HandleResult {
        HandleResult::NOT_HANDLED
    }

    fn can_infer(&self) -> bool {
        true
    }

    fn can_filter(&self) -> bool {
        true
    }

    fn can_batch(&self) -> bool {
        true
    }

    /// Guards re-entry into a binding. `None` skips the binding.
    fn can_dispatch(
        &self,
        _receiver: Option<&Payload>,
        _binding: &Arc<Binding>,
    ) -> Option<DispatchGuard> {
        Some(DispatchGuard::approved())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.policy().name(), self.key())
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Callback {
    pub fn is<C: Callback>(&self) -> bool {
        self.as_any().is::<C>()
    }

    pub fn downcast_ref<C: Callback>(&self) -> Option<&C> {
        self.as_any().downcast_ref::<C>()
    }
}

/// Recovers the concrete callback behind a [`CallbackRef`].
pub fn downcast_arc<C: Callback>(callback: &CallbackRef) -> Option<Arc<C>> {
    callback.clone().into_any().downcast::<C>().ok()
}

// ============================================================================
// Guards
// ============================================================================

/// Resets guard state when dropped.
#[derive(Default)]
pub struct DispatchGuard {
    reset: Option<Box<dyn FnOnce() + Send>>,
}

impl DispatchGuard {
    /// Approval with nothing to undo.
    pub fn approved() -> Self {
        Self::default()
    }

    /// Approval that runs `reset` once the binding returns.
    pub fn new(reset: impl FnOnce() + Send + 'static) -> Self {
        Self {
            reset: Some(Box::new(reset)),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if let Some(reset) = self.reset.take() {
            reset();
        }
    }
}

/// Guard applied by a handler rather than the callback.
pub trait CallbackGuard: Send + Sync {
    fn can_dispatch(&self, receiver: Option<&Payload>, binding: &Arc<Binding>)
    -> Option<DispatchGuard>;
}

// ============================================================================
// CallbackBase
// ============================================================================

/// Result storage shared by every callback kind.
#[derive(Default)]
pub struct CallbackBase {
    many: bool,
    constraints: Vec<Arc<dyn Constraint>>,
    results: Mutex<Vec<Received>>,
}

impl CallbackBase {
    pub fn new(many: bool) -> Self {
        Self {
            many,
            ..Self::default()
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<Arc<dyn Constraint>>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn constraints(&self) -> &[Arc<dyn Constraint>] {
        &self.constraints
    }

    pub fn add(&self, result: Received) {
        self.results.lock().push(result);
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }

    /// Every accepted payload in acceptance order.
    pub fn results(&self) -> Resolution<Vec<Payload>> {
        let results = self.results.lock().clone();
        if results
            .iter()
            .all(|r| matches!(r, Received::Value(_)))
        {
            let values = results
                .into_iter()
                .filter_map(|r| match r {
                    Received::Value(value) => Some(value),
                    Received::Pending(_) => None,
                })
                .collect();
            return Resolution::Ready(values);
        }
        let parts = results.into_iter().map(|r| match r {
            Received::Value(value) => Deferred::resolved(vec![value]),
            Received::Pending(pending) => pending,
        });
        Resolution::Pending(Deferred::all(parts).then(|groups| groups.into_iter().flatten().collect()))
    }

    /// The primary result: the first accepted payload.
    pub fn result(&self) -> Resolution<Option<Payload>> {
        self.results()
            .map(|values: Vec<Payload>| values.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_results_keep_order_across_pending() {
        let base = CallbackBase::new(true);
        base.add(Received::Value(Payload::new(1_i32)));
        base.add(Received::Pending(Deferred::spawn(async {
            Ok(vec![Payload::new(2_i32), Payload::new(3_i32)])
        })));
        base.add(Received::Value(Payload::new(4_i32)));
        assert_eq!(base.result_count(), 3);

        let Resolution::Pending(values) = base.results() else {
            panic!("expected pending results");
        };
        let values: Vec<i32> = values
            .await
            .unwrap()
            .iter()
            .map(|p| *p.downcast_ref::<i32>().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_primary_result_before_acceptance_is_empty() {
        let base = CallbackBase::new(false);
        assert!(matches!(base.result(), Resolution::Ready(None)));
        base.add(Received::Value(Payload::new("x")));
        let Resolution::Ready(Some(primary)) = base.result() else {
            panic!("expected ready result");
        };
        assert_eq!(*primary.downcast_ref::<&str>().unwrap(), "x");
    }

    #[test]
    fn test_guard_resets_on_drop() {
        let flag = Arc::new(Mutex::new(false));
        let reset = flag.clone();
        drop(DispatchGuard::new(move || *reset.lock() = true));
        assert!(*flag.lock());
    }
}
