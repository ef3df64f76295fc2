//! Hierarchical dispatch scopes.
//!
//! A [`Context`] is a handler that owns a list of handlers and a set of
//! child contexts. Dispatch tries the context's own handlers before its
//! parent, so a child sees everything its ancestors provide. Ending a
//! context ends its children first, newest to oldest, and notifies
//! [`ContextObserver`]s on the way.
//!
//! ```rust,ignore
//! let root = Context::new();
//! let request = root.new_child();
//! request.add_handlers([Arc::new(Instance::of(Session::default())?) as BoxHandler]);
//! let session = request.resolve::<Session>()?;
//! request.end(EndReason::Ended);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::callback::{Callback, CallbackRef, Composition};
use crate::error::Result;
use crate::foundation::{Payload, TraversalAxis, Traversing, traverse};
use crate::handle_result::HandleResult;
use crate::handler::{BoxHandler, Handler, MutableHandlers};
use crate::provides::Provides;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Ending,
    Ended,
}

/// Why a context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Ended,
    Disposed,
    /// An ancestor ended or unwound.
    ParentEnded,
    Custom(String),
}

/// Receives lifecycle notifications from a context.
pub trait ContextObserver: Send + Sync + 'static {
    fn context_ending(&self, _context: &Context, _reason: &EndReason) {}

    fn context_ended(&self, _context: &Context, _reason: &EndReason) {}

    fn child_context_ending(&self, _child: &Context, _reason: &EndReason) {}

    fn child_context_ended(&self, _child: &Context, _reason: &EndReason) {}
}

struct Inner {
    id: usize,
    parent: Option<Weak<Inner>>,
    state: RwLock<ContextState>,
    handlers: MutableHandlers,
    children: RwLock<Vec<Context>>,
    observers: RwLock<Vec<(usize, Arc<dyn ContextObserver>)>>,
}

/// A node in the context tree. Cloning shares the node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A new root context.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Weak<Inner>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                state: RwLock::new(ContextState::Active),
                handlers: MutableHandlers::new(),
                children: RwLock::new(Vec::new()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn state(&self) -> ContextState {
        *self.inner.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ContextState::Active
    }

    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    pub fn root(&self) -> Context {
        let mut root = self.clone();
        while let Some(parent) = root.parent() {
            root = parent;
        }
        root
    }

    pub fn children(&self) -> Vec<Context> {
        self.inner.children.read().clone()
    }

    /// Creates a child owned by this context.
    pub fn new_child(&self) -> Context {
        let child = Self::with_parent(Some(Arc::downgrade(&self.inner)));
        self.inner.children.write().push(child.clone());
        child
    }

    pub fn add_handlers(&self, handlers: impl IntoIterator<Item = BoxHandler>) -> &Self {
        self.inner.handlers.add(handlers);
        self
    }

    pub fn insert_handlers(&self, index: usize, handlers: impl IntoIterator<Item = BoxHandler>) -> &Self {
        self.inner.handlers.insert(index, handlers);
        self
    }

    pub fn remove_handler(&self, handler: &BoxHandler) -> bool {
        self.inner.handlers.remove(handler)
    }

    /// This context as a shareable handler.
    pub fn boxed(&self) -> BoxHandler {
        Arc::new(self.clone())
    }

    // ─── Observers ──────────────────────────────────────────────────────────

    /// Subscribes `observer`. An ended context reports `context_ended`
    /// right away and keeps no subscription.
    pub fn observe(&self, observer: Arc<dyn ContextObserver>) -> Subscription {
        if self.state() == ContextState::Ended {
            observer.context_ended(self, &EndReason::Ended);
            return Subscription::empty();
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().push((id, observer));
        Subscription {
            context: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn observers(&self) -> Vec<Arc<dyn ContextObserver>> {
        self.inner
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Ends this context and every descendant.
    pub fn end(&self, reason: EndReason) {
        {
            let mut state = self.inner.state.write();
            if *state != ContextState::Active {
                return;
            }
            *state = ContextState::Ending;
        }
        debug!(context = self.id(), ?reason, "context ending");
        let parent = self.parent();
        for observer in self.observers() {
            observer.context_ending(self, &reason);
        }
        if let Some(parent) = &parent {
            for observer in parent.observers() {
                observer.child_context_ending(self, &reason);
            }
        }

        self.end_children();

        *self.inner.state.write() = ContextState::Ended;
        for observer in self.observers() {
            observer.context_ended(self, &reason);
        }
        if let Some(parent) = &parent {
            for observer in parent.observers() {
                observer.child_context_ended(self, &reason);
            }
            parent
                .inner
                .children
                .write()
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
        self.inner.observers.write().clear();
        debug!(context = self.id(), "context ended");
    }

    /// Ends every child but leaves this context active.
    pub fn unwind(&self) -> &Self {
        self.end_children();
        self
    }

    pub fn dispose(&self) {
        self.end(EndReason::Disposed);
    }

    fn end_children(&self) {
        let children = self.children();
        for child in children.iter().rev() {
            child.end(EndReason::ParentEnded);
        }
    }

    /// This context and every descendant, parents before children.
    pub fn self_or_descendants(&self) -> Result<Vec<Context>> {
        let mut nodes = Vec::new();
        traverse(self, TraversalAxis::SelfOrDescendant, |node| {
            nodes.push(node.clone());
            Ok(false)
        })?;
        Ok(nodes)
    }

    /// A handler that notifies this context and all its descendants.
    ///
    /// Dispatches are greedy and best effort: every node is visited and the
    /// result is handled if any node handled it.
    pub fn publish_handler(&self) -> BoxHandler {
        Arc::new(Publisher {
            context: self.clone(),
        })
    }

    fn handle_local(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let unwrapped = Composition::unwrap(callback);
        let mut result = HandleResult::NOT_HANDLED;
        if let Some(provides) = unwrapped.downcast_ref::<Provides>() {
            result = provides.dispatch_receiver(&Payload::new(self.clone()), greedy, composer);
            if result.should_stop(greedy) {
                return result;
            }
        }
        result.or(self.inner.handlers.handle(callback, greedy, composer))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for Context {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        if self.state() == ContextState::Ended {
            return HandleResult::NOT_HANDLED;
        }
        let result = self.handle_local(callback, greedy, composer);
        match self.parent() {
            Some(parent) => result.otherwise_if(greedy, || parent.handle(callback, greedy, composer)),
            None => result,
        }
    }
}

impl Traversing for Context {
    fn parent(&self) -> Option<Self> {
        Context::parent(self)
    }

    fn children(&self) -> Vec<Self> {
        Context::children(self)
    }

    fn node_id(&self) -> usize {
        self.id()
    }

    fn describe(&self) -> String {
        format!("context #{}", self.id())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}

struct Publisher {
    context: Context,
}

impl Handler for Publisher {
    fn handle(&self, callback: &CallbackRef, _greedy: bool, composer: &BoxHandler) -> HandleResult {
        let nodes = match self.context.self_or_descendants() {
            Ok(nodes) => nodes,
            Err(err) => return HandleResult::NOT_HANDLED.with_error(err),
        };
        nodes.iter().fold(HandleResult::NOT_HANDLED, |result, node| {
            result.or(node.handle_local(callback, true, composer))
        })
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Removes an observer from its context.
#[must_use = "dropping a subscription keeps the observer registered"]
pub struct Subscription {
    context: Weak<Inner>,
    id: usize,
}

impl Subscription {
    fn empty() -> Self {
        Self {
            context: Weak::new(),
            id: 0,
        }
    }

    pub fn unsubscribe(self) {
        if let Some(inner) = self.context.upgrade() {
            inner.observers.write().retain(|(id, _)| *id != self.id);
        }
    }
}
