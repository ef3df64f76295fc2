//! The `provides` callback: covariant resolution of values by key.
//!
//! A [`Provides`] asks for anything assignable to its key. Nested
//! resolutions made while a provider runs record the outer request as their
//! parent, which lets constraints such as [`For`](crate::constraint::For)
//! see who is asking and lets the guard refuse re-entering a binding that is
//! already resolving further up the chain.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::binding::Binding;
use crate::callback::{
    Callback, CallbackBase, CallbackRef, Composition, DispatchGuard, Received, Resolution,
    downcast_arc,
};
use crate::constraint::Constraint;
use crate::descriptor::DescriptorFactory;
use crate::error::Result;
use crate::foundation::{Key, Payload};
use crate::handle_result::HandleResult;
use crate::handler::{BoxHandler, Handler, Instance, dispatch};
use crate::policy::{PROVIDES, Policy};

type Current = Arc<Mutex<Option<(Option<usize>, Arc<Binding>)>>>;

// ============================================================================
// Provides
// ============================================================================

/// Requests values assignable to a key.
pub struct Provides {
    key: Key,
    base: CallbackBase,
    parent: Option<Arc<Provides>>,
    current: Current,
}

/// Builder for [`Provides`].
pub struct ProvidesBuilder {
    key: Key,
    many: bool,
    parent: Option<Arc<Provides>>,
    constraints: Vec<Arc<dyn Constraint>>,
}

impl ProvidesBuilder {
    /// The request this one is made on behalf of.
    pub fn parent(mut self, parent: impl Into<Option<Arc<Provides>>>) -> Self {
        self.parent = parent.into();
        self
    }

    /// Collects every available value instead of the first one.
    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    pub fn constraint(mut self, constraint: impl Constraint) -> Self {
        self.constraints.push(Arc::new(constraint));
        self
    }

    pub fn constraints(mut self, constraints: impl IntoIterator<Item = Arc<dyn Constraint>>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn build(self) -> Provides {
        Provides {
            key: self.key,
            base: CallbackBase::new(self.many).with_constraints(self.constraints),
            parent: self.parent,
            current: Arc::default(),
        }
    }
}

impl Provides {
    pub fn builder(key: impl Into<Key>) -> ProvidesBuilder {
        ProvidesBuilder {
            key: key.into(),
            many: false,
            parent: None,
            constraints: Vec::new(),
        }
    }

    /// Request for the type `T`.
    pub fn of<T: ?Sized + 'static>() -> ProvidesBuilder {
        Self::builder(Key::of::<T>())
    }

    pub fn parent(&self) -> Option<&Arc<Provides>> {
        self.parent.as_ref()
    }

    /// The binding currently producing a value for this request.
    pub fn binding(&self) -> Option<Arc<Binding>> {
        self.current.lock().as_ref().map(|(_, binding)| binding.clone())
    }

    /// Dispatches this request through `handler` and returns the first value.
    pub fn resolve(self: Arc<Self>, handler: &BoxHandler) -> Result<Resolution<Option<Payload>>> {
        self.run(handler)?;
        Ok(self.base.result())
    }

    /// Dispatches this request through `handler` and returns every value.
    pub fn resolve_all(self: Arc<Self>, handler: &BoxHandler) -> Result<Resolution<Vec<Payload>>> {
        self.run(handler)?;
        Ok(self.base.results())
    }

    fn run(self: &Arc<Self>, handler: &BoxHandler) -> Result<()> {
        let callback: CallbackRef = self.clone();
        match dispatch(handler, &callback, self.base.is_many()).into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn accepts(&self, payload: Payload) -> Option<Payload> {
        match &self.key {
            Key::Type(key) => payload.upcast(*key),
            _ => Some(payload),
        }
    }

    fn in_progress(&self, receiver: Option<usize>, binding: &Arc<Binding>) -> bool {
        let mut next = Some(self);
        while let Some(provides) = next {
            if let Some((addr, current)) = provides.current.lock().as_ref()
                && *addr == receiver
                && Arc::ptr_eq(current, binding)
            {
                return true;
            }
            next = provides.parent.as_deref();
        }
        false
    }
}

impl Callback for Provides {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn policy(&self) -> &'static dyn Policy {
        &PROVIDES
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn receive_result(&self, result: Received, _strict: bool, _composer: &BoxHandler) -> HandleResult {
        match result {
            Received::Value(payload) => match self.accepts(payload) {
                Some(payload) => {
                    self.base.add(Received::Value(payload));
                    HandleResult::HANDLED
                }
                None => HandleResult::NOT_HANDLED,
            },
            Received::Pending(pending) => {
                let key = self.key.clone();
                let filtered = pending.then(move |payloads| {
                    payloads
                        .into_iter()
                        .filter_map(|p| match &key {
                            Key::Type(key) => p.upcast(*key),
                            _ => Some(p),
                        })
                        .collect::<Vec<_>>()
                });
                self.base.add(Received::Pending(filtered));
                HandleResult::HANDLED
            }
        }
    }

    fn dispatch_receiver(&self, receiver: &Payload, _greedy: bool, composer: &BoxHandler) -> HandleResult {
        if !self.constraints().is_empty() {
            return HandleResult::NOT_HANDLED;
        }
        match &self.key {
            Key::Type(key) if receiver.key().is_assignable_to(key) => {
                self.receive_result(Received::Value(receiver.clone()), false, composer)
            }
            _ => HandleResult::NOT_HANDLED,
        }
    }

    fn can_dispatch(&self, receiver: Option<&Payload>, binding: &Arc<Binding>) -> Option<DispatchGuard> {
        let addr = receiver.map(Payload::addr);
        if self.in_progress(addr, binding) {
            trace!(binding = %binding, "binding already resolving");
            return None;
        }
        let previous = self.current.lock().replace((addr, binding.clone()));
        let current = self.current.clone();
        Some(DispatchGuard::new(move || *current.lock() = previous))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The provides request behind `callback`, looking through compositions
/// and [`Resolves`].
pub(crate) fn provides_of(callback: &CallbackRef) -> Option<Arc<Provides>> {
    let callback = Composition::unwrap(callback);
    if let Some(resolves) = callback.downcast_ref::<Resolves>() {
        return Some(resolves.provides.clone());
    }
    downcast_arc::<Provides>(&callback)
}

// ============================================================================
// Resolves
// ============================================================================

/// Resolves handler instances of a type and dispatches a callback to them.
///
/// The inference handler uses this to reach handlers that are not in the
/// chain yet: the handler type is provided (usually by its constructor) and
/// each resolved instance receives the original callback.
pub struct Resolves {
    provides: Arc<Provides>,
    callback: CallbackRef,
    greedy: bool,
    succeeded: Arc<AtomicBool>,
    factory: DescriptorFactory,
}

impl Resolves {
    pub fn new(
        key: Key,
        callback: CallbackRef,
        greedy: bool,
        parent: Option<Arc<Provides>>,
        factory: DescriptorFactory,
    ) -> Self {
        Self {
            provides: Arc::new(Provides::builder(key).parent(parent).many(greedy).build()),
            callback,
            greedy,
            succeeded: Arc::new(AtomicBool::new(false)),
            factory,
        }
    }

    pub fn provides(&self) -> &Provides {
        &self.provides
    }

    pub fn callback(&self) -> &CallbackRef {
        &self.callback
    }

    /// True once a resolved handler accepted the callback.
    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }

    fn accept(
        handler: Payload,
        callback: &CallbackRef,
        greedy: bool,
        succeeded: &AtomicBool,
        factory: &DescriptorFactory,
        composer: &BoxHandler,
    ) -> HandleResult {
        if !greedy && succeeded.load(Ordering::SeqCst) {
            return HandleResult::HANDLED;
        }
        let Some(descriptor) = factory.descriptor(handler.key()) else {
            return HandleResult::NOT_HANDLED;
        };
        let result = Instance::from_parts(handler, descriptor).handle(callback, greedy, composer);
        if result.is_handled() {
            succeeded.store(true, Ordering::SeqCst);
        }
        result
    }
}

impl Callback for Resolves {
    fn key(&self) -> Key {
        self.provides.key()
    }

    fn policy(&self) -> &'static dyn Policy {
        &PROVIDES
    }

    fn base(&self) -> &CallbackBase {
        self.provides.base()
    }

    fn receive_result(&self, result: Received, _strict: bool, composer: &BoxHandler) -> HandleResult {
        match result {
            Received::Value(handler) => Self::accept(
                handler,
                &self.callback,
                self.greedy,
                &self.succeeded,
                &self.factory,
                composer,
            ),
            Received::Pending(pending) => {
                let callback = self.callback.clone();
                let greedy = self.greedy;
                let succeeded = self.succeeded.clone();
                let factory = self.factory.clone();
                let composer = composer.clone();
                let dispatched = pending.try_then(move |handlers| {
                    let result = handlers.into_iter().fold(HandleResult::NOT_HANDLED, |result, handler| {
                        result.or(Self::accept(handler, &callback, greedy, &succeeded, &factory, &composer))
                    });
                    match result.into_error() {
                        Some(err) => {
                            trace!(error = %err, "resolved handlers failed");
                            Err(err)
                        }
                        None => Ok(Vec::new()),
                    }
                });
                self.provides.base().add(Received::Pending(dispatched));
                HandleResult::HANDLED
            }
        }
    }

    fn dispatch_receiver(&self, receiver: &Payload, _greedy: bool, composer: &BoxHandler) -> HandleResult {
        match &self.provides.key {
            Key::Type(key) if receiver.key().is_assignable_to(key) => {
                self.receive_result(Received::Value(receiver.clone()), false, composer)
            }
            _ => HandleResult::NOT_HANDLED,
        }
    }

    fn can_dispatch(&self, receiver: Option<&Payload>, binding: &Arc<Binding>) -> Option<DispatchGuard> {
        self.provides.can_dispatch(receiver, binding)
    }

    fn describe(&self) -> String {
        format!("resolves {} for {}", self.provides.key, self.callback.describe())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
