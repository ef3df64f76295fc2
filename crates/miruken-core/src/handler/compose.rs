//! Composite handlers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::callback::{Callback, CallbackRef, Composition};
use crate::foundation::Payload;
use crate::handle_result::HandleResult;
use crate::provides::{Provides, Resolves};

use super::{BoxHandler, Handler};

// ============================================================================
// Handlers
// ============================================================================

/// An ordered list of handlers visited in turn.
///
/// A non-greedy dispatch stops at the first handler that accepts.
#[derive(Clone, Default)]
pub struct Handlers {
    handlers: Vec<BoxHandler>,
}

impl Handlers {
    pub fn new(handlers: impl IntoIterator<Item = BoxHandler>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub(crate) fn handle_each<'a>(
    handlers: impl IntoIterator<Item = &'a BoxHandler>,
    callback: &CallbackRef,
    greedy: bool,
    composer: &BoxHandler,
) -> HandleResult {
    let mut result = HandleResult::NOT_HANDLED;
    for handler in handlers {
        result = result.or(handler.handle(callback, greedy, composer));
        if result.should_stop(greedy) {
            break;
        }
    }
    result
}

impl Handler for Handlers {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        handle_each(&self.handlers, callback, greedy, composer)
    }
}

// ============================================================================
// WithHandler
// ============================================================================

/// Tries `child` before falling back to `parent`.
///
/// Greedy dispatches always reach the parent.
#[derive(Clone)]
pub struct WithHandler {
    parent: BoxHandler,
    child: BoxHandler,
}

impl WithHandler {
    pub fn new(parent: BoxHandler, child: BoxHandler) -> Self {
        Self { parent, child }
    }
}

impl Handler for WithHandler {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let result = self.child.handle(callback, greedy, composer);
        if result.is_stop() {
            return result;
        }
        result.otherwise_if(greedy, || self.parent.handle(callback, greedy, composer))
    }
}

// ============================================================================
// MutableHandlers
// ============================================================================

/// A handler list that can change while dispatches are running.
///
/// Each dispatch iterates a snapshot taken under the read lock.
#[derive(Default)]
pub struct MutableHandlers {
    handlers: RwLock<Vec<BoxHandler>>,
}

impl MutableHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends handlers to the end of the list.
    pub fn add(&self, handlers: impl IntoIterator<Item = BoxHandler>) {
        self.handlers.write().extend(handlers);
    }

    /// Inserts handlers at `index`, clamped to the list length.
    pub fn insert(&self, index: usize, handlers: impl IntoIterator<Item = BoxHandler>) {
        let mut current = self.handlers.write();
        let index = index.min(current.len());
        current.splice(index..index, handlers);
    }

    /// Removes `handler`, comparing by identity. Returns true if found.
    pub fn remove(&self, handler: &BoxHandler) -> bool {
        let mut current = self.handlers.write();
        let before = current.len();
        current.retain(|h| !Arc::ptr_eq(h, handler));
        current.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<BoxHandler> {
        self.handlers.read().clone()
    }
}

impl Handler for MutableHandlers {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        handle_each(&self.snapshot(), callback, greedy, composer)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Answers `provides` callbacks with a fixed value.
///
/// The value is offered when the requested key is its type or an ancestor
/// of it and the request carries no constraints.
#[derive(Clone, Debug)]
pub struct Provider {
    value: Payload,
}

impl Provider {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Payload::new(value),
        }
    }

    pub fn shared<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value: Payload::from_arc(value),
        }
    }

    pub fn payload(value: Payload) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Payload {
        &self.value
    }
}

impl Handler for Provider {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let callback = Composition::unwrap(callback);
        if let Some(provides) = callback.downcast_ref::<Provides>() {
            return provides.dispatch_receiver(&self.value, greedy, composer);
        }
        if let Some(resolves) = callback.downcast_ref::<Resolves>() {
            return resolves.provides().dispatch_receiver(&self.value, greedy, composer);
        }
        HandleResult::NOT_HANDLED
    }
}
