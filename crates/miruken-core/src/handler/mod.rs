//! Handlers and the top-level dispatch loop.
//!
//! Everything that can receive a callback implements [`Handler`]. The
//! building blocks are:
//!
//! - **Instance** ([`instance`]) – a handler object paired with its cached
//!   descriptor; this is where bindings are matched and invoked
//! - **Composites** ([`compose`]) – ordered handler lists, parent/child
//!   chains, mutable lists and value providers
//! - **Layers** ([`layer`]) – `tower_layer::Layer` builders that wrap a
//!   handler with more handlers, options or filters
//! - **Operations** ([`ops`]) – the typed API (`command`, `resolve`, ...)
//!   exposed on every [`BoxHandler`]
//!
//! # Example
//!
//! ```rust,ignore
//! use miruken_core::prelude::*;
//!
//! let handler = Instance::of(Quotes::default())?
//!     .boxed()
//!     .layer(WithValues::new().value(Exchange::nyse()));
//!
//! let quote: Arc<Quote> = handler.execute(GetQuote::new("MSFT"))?.await?;
//! ```

pub mod compose;
pub mod instance;
pub mod layer;
pub mod ops;

use std::sync::Arc;

use tracing::{Level, debug, span};

use crate::callback::CallbackRef;
use crate::handle_result::HandleResult;

pub use compose::{Handlers, MutableHandlers, Provider, WithHandler};
pub use instance::Instance;
pub use layer::{FilterLayer, OptionsLayer, Semantics, SuppressFilters, WithHandlers, WithValues};
pub use ops::HandlerExt;

/// Receives callbacks.
///
/// `composer` is the outermost handler of the current dispatch; bindings
/// resolve their dependencies and forward new callbacks through it.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult;
}

/// Shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// A handler backed by a closure.
pub struct HandlerFn<F>(F);

impl<F> HandlerFn<F>
where
    F: Fn(&CallbackRef, bool, &BoxHandler) -> HandleResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&CallbackRef, bool, &BoxHandler) -> HandleResult + Send + Sync + 'static,
{
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        (self.0)(callback, greedy, composer)
    }
}

/// Dispatches `callback` with `handler` as its own composer.
pub fn dispatch(handler: &BoxHandler, callback: &CallbackRef, greedy: bool) -> HandleResult {
    let span = span!(
        Level::DEBUG,
        "dispatch",
        policy = callback.policy().name(),
        key = %callback.key(),
        greedy
    );
    let _enter = span.enter();
    let result = handler.handle(callback, greedy, handler);
    debug!(result = %result, "dispatched");
    result
}

/// Converts a handler into a [`BoxHandler`].
pub trait IntoBoxHandler {
    fn boxed(self) -> BoxHandler;
}

impl<H: Handler> IntoBoxHandler for H {
    fn boxed(self) -> BoxHandler {
        Arc::new(self)
    }
}
