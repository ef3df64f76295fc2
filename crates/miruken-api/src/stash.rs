//! Scratch storage for the duration of a message.
//!
//! A [`Stash`] keeps values by [`Key`] and answers `provides` requests for
//! them, so a filter can stash a value that a handler later receives as a
//! dependency. Stashes nest: [`send`](crate::send), [`post`](crate::post)
//! and [`publish`](crate::publish) place a fresh stash in front of the
//! handler, reads that miss it fall through to the next one, and a root
//! stash ends the search with nothing found.
//!
//! ```rust,ignore
//! stash_put(ctx.composer(), Order::new(1))?;
//! let order: Option<Arc<Order>> = stash_get(ctx.composer())?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use miruken_core::callback::CallbackBase;
use miruken_core::policy::{Contravariant, Policy};
use miruken_core::{
    BoxHandler, Callback, CallbackRef, Composition, Error, HandleResult, Handler, Key, Payload,
    Provides, Received, Result,
};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

static STASH: Contravariant = Contravariant::new("stash");

// ============================================================================
// Stash
// ============================================================================

/// Values stored by key. A `None` entry hides the same key further out.
#[derive(Debug, Default)]
pub struct Stash {
    root: bool,
    data: RwLock<HashMap<Key, Option<Payload>>>,
}

impl Stash {
    /// A root stash answers every read, even a miss.
    pub fn new(root: bool) -> Self {
        Self {
            root,
            data: RwLock::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn apply(&self, request: &StashRequest) -> HandleResult {
        match &request.action {
            Action::Get => match self.data.read().get(&request.key) {
                Some(value) => {
                    *request.value.lock() = value.clone();
                    HandleResult::HANDLED
                }
                None => HandleResult::from_handled(self.root),
            },
            Action::Put(value) => {
                self.data.write().insert(request.key.clone(), value.clone());
                HandleResult::HANDLED
            }
            Action::Drop => {
                self.data.write().remove(&request.key);
                HandleResult::HANDLED
            }
        }
    }

    fn provide(&self, provides: &Provides, composer: &BoxHandler) -> HandleResult {
        if !provides.constraints().is_empty() {
            return HandleResult::NOT_HANDLED;
        }
        let value = self.data.read().get(&provides.key()).cloned().flatten();
        match value {
            Some(value) => provides.receive_result(Received::Value(value), true, composer),
            None => HandleResult::NOT_HANDLED,
        }
    }
}

impl Handler for Stash {
    fn handle(&self, callback: &CallbackRef, _greedy: bool, composer: &BoxHandler) -> HandleResult {
        let callback = Composition::unwrap(callback);
        if let Some(request) = callback.downcast_ref::<StashRequest>() {
            trace!(key = %request.key, action = request.action.name(), root = self.root, "stash");
            return self.apply(request);
        }
        if let Some(provides) = callback.downcast_ref::<Provides>() {
            return self.provide(provides, composer);
        }
        HandleResult::NOT_HANDLED
    }
}

// ============================================================================
// StashRequest
// ============================================================================

enum Action {
    Get,
    Put(Option<Payload>),
    Drop,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Put(_) => "put",
            Action::Drop => "drop",
        }
    }
}

/// A read, write or removal aimed at the nearest stash.
pub struct StashRequest {
    key: Key,
    action: Action,
    value: Mutex<Option<Payload>>,
    base: CallbackBase,
}

impl StashRequest {
    fn new(key: Key, action: Action) -> Self {
        Self {
            key,
            action,
            value: Mutex::new(None),
            base: CallbackBase::default(),
        }
    }

    fn send(self, handler: &BoxHandler) -> Result<Option<Payload>> {
        let request = Arc::new(self);
        let callback: CallbackRef = request.clone();
        let result = handler.handle(&callback, false, handler);
        let handled = result.is_handled();
        if let Some(err) = result.into_error() {
            return Err(err);
        }
        if !handled {
            return Err(Error::not_handled(callback.describe()));
        }
        let value = request.value.lock().take();
        Ok(value)
    }
}

impl Callback for StashRequest {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> &'static dyn Policy {
        &STASH
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

    fn describe(&self) -> String {
        format!("stash {} {}", self.action.name(), self.key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Reads the value stashed under `key`.
///
/// `Ok(None)` means a root stash was reached without finding it or the key
/// was hidden. Fails with `NotHandled` when no stash is reachable.
pub fn stash_get_key(handler: &BoxHandler, key: impl Into<Key>) -> Result<Option<Payload>> {
    StashRequest::new(key.into(), Action::Get).send(handler)
}

/// Reads the stashed `T`.
pub fn stash_get<T: Send + Sync + 'static>(handler: &BoxHandler) -> Result<Option<Arc<T>>> {
    Ok(stash_get_key(handler, Key::of::<T>())?.and_then(|value| value.cast::<T>()))
}

/// Stores `value` under `key` in the nearest stash. `None` hides the key.
pub fn stash_put_key(handler: &BoxHandler, key: impl Into<Key>, value: Option<Payload>) -> Result<()> {
    StashRequest::new(key.into(), Action::Put(value))
        .send(handler)
        .map(|_| ())
}

/// Stores `value` keyed by its type.
pub fn stash_put<T: Send + Sync + 'static>(handler: &BoxHandler, value: T) -> Result<()> {
    stash_put_key(handler, Key::of::<T>(), Some(Payload::new(value)))
}

/// Stores an already shared `value`, keeping its identity.
pub fn stash_put_shared<T: Send + Sync + 'static>(handler: &BoxHandler, value: Arc<T>) -> Result<()> {
    stash_put_key(handler, Key::of::<T>(), Some(Payload::from_arc(value)))
}

/// Hides any `T` stashed further out.
pub fn stash_hide<T: Send + Sync + 'static>(handler: &BoxHandler) -> Result<()> {
    stash_put_key(handler, Key::of::<T>(), None)
}

/// Returns the stashed `T`, stashing `value` first if there is none.
pub fn stash_get_or_put<T: Send + Sync + 'static>(handler: &BoxHandler, value: T) -> Result<Arc<T>> {
    if let Some(existing) = stash_get::<T>(handler)? {
        return Ok(existing);
    }
    let value = Arc::new(value);
    stash_put_shared(handler, value.clone())?;
    Ok(value)
}

/// Removes the value under `key` from the nearest stash.
pub fn stash_drop_key(handler: &BoxHandler, key: impl Into<Key>) -> Result<()> {
    StashRequest::new(key.into(), Action::Drop)
        .send(handler)
        .map(|_| ())
}

pub fn stash_drop<T: Send + Sync + 'static>(handler: &BoxHandler) -> Result<()> {
    stash_drop_key(handler, Key::of::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miruken_core::binding::Output;
    use miruken_core::filter::{FilterSet, stage};
    use miruken_core::prelude::*;
    use miruken_core::{Filter, FilterProvider, HandleContext, Handlers, Next, WithHandler};

    #[derive(Debug, PartialEq)]
    struct Order {
        id: u32,
        cancelled: bool,
    }

    impl IntoReply for Order {}

    struct CancelOrder(u32);

    struct StashOrder;

    impl Filter for StashOrder {
        fn order(&self) -> i32 {
            stage::FILTER
        }

        fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
            let cancel = ctx.source_as::<CancelOrder>()?;
            stash_put(
                ctx.composer(),
                Order {
                    id: cancel.0,
                    cancelled: false,
                },
            )?;
            next.pipe()
        }
    }

    #[derive(Default)]
    struct Orders;

    impl Orders {
        fn cancel(&self, _cancel: &CancelOrder, order: Dep<Order>) -> Order {
            Order {
                id: order.id,
                cancelled: true,
            }
        }
    }

    impl Describe for Orders {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            let stash_order = FilterSet::new([Arc::new(StashOrder) as Arc<dyn Filter>]);
            handler
                .default_constructor()
                .handles_with(Anchor::new().filter(stash_order), Orders::cancel)
        }
    }

    fn root() -> BoxHandler {
        Arc::new(Stash::new(true))
    }

    fn nested(parent: &BoxHandler) -> BoxHandler {
        Arc::new(WithHandler::new(parent.clone(), Arc::new(Stash::new(false))))
    }

    #[test]
    fn test_put_then_get_keeps_identity() {
        let handler = root();
        let order = Arc::new(Order { id: 1, cancelled: false });
        stash_put_shared(&handler, order.clone()).unwrap();
        let stashed = stash_get::<Order>(&handler).unwrap().unwrap();
        assert!(Arc::ptr_eq(&order, &stashed));
    }

    #[test]
    fn test_root_answers_misses() {
        assert!(stash_get::<Order>(&root()).unwrap().is_none());
    }

    #[test]
    fn test_nested_miss_without_root_is_not_handled() {
        let handler: BoxHandler = Arc::new(Stash::new(false));
        assert!(stash_get::<Order>(&handler).unwrap_err().is_not_handled());
    }

    #[test]
    fn test_get_or_put() {
        let handler = root();
        let first = stash_get_or_put(&handler, Order { id: 1, cancelled: false }).unwrap();
        let second = stash_get_or_put(&handler, Order { id: 2, cancelled: false }).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.id, 1);
    }

    #[test]
    fn test_drop_removes_from_nearest_stash() {
        let handler = nested(&root());
        stash_put(&handler, Order { id: 1, cancelled: false }).unwrap();
        stash_drop::<Order>(&handler).unwrap();
        assert!(stash_get::<Order>(&handler).unwrap().is_none());
    }

    #[test]
    fn test_reads_fall_through_to_outer_stash() {
        let outer = root();
        let inner = nested(&outer);
        stash_put(&outer, Order { id: 3, cancelled: false }).unwrap();
        assert_eq!(stash_get::<Order>(&inner).unwrap().unwrap().id, 3);
    }

    #[test]
    fn test_hide_masks_outer_value() {
        let outer = root();
        let inner = nested(&outer);
        stash_put(&outer, Order { id: 3, cancelled: false }).unwrap();
        stash_hide::<Order>(&inner).unwrap();
        assert!(stash_get::<Order>(&inner).unwrap().is_none());
        assert!(stash_get::<Order>(&outer).unwrap().is_some());
    }

    #[test]
    fn test_stashed_values_are_provided() {
        let handler = root();
        stash_put(&handler, Order { id: 4, cancelled: false }).unwrap();
        let order = handler.resolve::<Order>().unwrap().ready().flatten().unwrap();
        assert_eq!(order.id, 4);
    }

    #[test]
    fn test_filter_stashes_handler_dependency() {
        let orders: BoxHandler = Instance::of(Orders).unwrap().boxed();
        let handler: BoxHandler = Arc::new(Handlers::new([root(), orders]));
        let order = handler
            .execute::<Order, _>(CancelOrder(9))
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(*order, Order { id: 9, cancelled: true });
    }
}
