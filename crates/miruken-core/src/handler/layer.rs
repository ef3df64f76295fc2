//! Handler builders as `tower_layer::Layer`s.
//!
//! Every builder here turns a [`BoxHandler`] into another one, so they
//! stack with `tower_layer::Stack` or through [`HandlerExt::layer`].
//!
//! ```rust,ignore
//! let handler = root
//!     .layer(WithValues::new().value(Clock::utc()))
//!     .layer(SuppressFilters);
//! ```
//!
//! [`HandlerExt::layer`]: super::HandlerExt::layer

use std::sync::Arc;

use tower_layer::Layer;

use crate::callback::{CallbackRef, Composition};
use crate::filter::{FilterOptions, FilterProvider};
use crate::foundation::Payload;
use crate::handle_result::HandleResult;
use crate::options::{Merge, WithOptions};

use super::{BoxHandler, Handler, Handlers, Provider, WithHandler};

// ============================================================================
// WithHandlers
// ============================================================================

/// Places extra handlers in front of the wrapped one.
#[derive(Clone, Default)]
pub struct WithHandlers {
    handlers: Vec<BoxHandler>,
}

impl WithHandlers {
    pub fn new(handlers: impl IntoIterator<Item = BoxHandler>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }

    pub fn handler(mut self, handler: BoxHandler) -> Self {
        self.handlers.push(handler);
        self
    }
}

impl Layer<BoxHandler> for WithHandlers {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        if self.handlers.is_empty() {
            return inner;
        }
        Arc::new(WithHandler::new(inner, Arc::new(Handlers::new(self.handlers.clone()))))
    }
}

// ============================================================================
// WithValues
// ============================================================================

/// Provides fixed values ahead of the wrapped handler.
#[derive(Clone, Debug, Default)]
pub struct WithValues {
    values: Vec<Payload>,
}

impl WithValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.payload(Payload::new(value))
    }

    pub fn shared<T: Send + Sync + 'static>(self, value: Arc<T>) -> Self {
        self.payload(Payload::from_arc(value))
    }

    pub fn payload(mut self, value: Payload) -> Self {
        self.values.push(value);
        self
    }
}

impl Layer<BoxHandler> for WithValues {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        let providers = self
            .values
            .iter()
            .map(|value| -> BoxHandler { Arc::new(Provider::payload(value.clone())) });
        WithHandlers::new(providers).layer(inner)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Attaches an options value to the wrapped handler.
#[derive(Clone, Debug, Default)]
pub struct OptionsLayer<T> {
    options: T,
}

impl<T: Merge> OptionsLayer<T> {
    pub fn new(options: T) -> Self {
        Self { options }
    }
}

impl<T: Merge> Layer<BoxHandler> for OptionsLayer<T> {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        Arc::new(WithOptions::new(inner, self.options.clone()))
    }
}

/// Attaches [`FilterOptions`]: extra providers, skip flags or a
/// cancellation token.
#[derive(Clone, Default)]
pub struct FilterLayer {
    options: FilterOptions,
}

impl FilterLayer {
    pub fn new(options: FilterOptions) -> Self {
        Self { options }
    }

    /// Applies `providers` to every binding reached through the handler.
    pub fn providers(providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>) -> Self {
        Self::new(FilterOptions::providers(providers))
    }
}

impl Layer<BoxHandler> for FilterLayer {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        OptionsLayer::new(self.options.clone()).layer(inner)
    }
}

/// Runs only required filters below this point.
#[derive(Clone, Copy, Debug, Default)]
pub struct SuppressFilters;

impl Layer<BoxHandler> for SuppressFilters {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        FilterLayer::new(FilterOptions::skip()).layer(inner)
    }
}

// ============================================================================
// Semantics
// ============================================================================

/// Overrides how callbacks are dispatched below this point.
///
/// `broadcast` replaces the greedy flag of every dispatch. With
/// `best_effort`, a callback nobody accepts (or every binding rejects)
/// still counts as handled; other errors pass through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Semantics {
    pub broadcast: Option<bool>,
    pub best_effort: Option<bool>,
}

impl Semantics {
    pub const BROADCAST: Semantics = Semantics {
        broadcast: Some(true),
        best_effort: None,
    };

    pub const BEST_EFFORT: Semantics = Semantics {
        broadcast: None,
        best_effort: Some(true),
    };

    /// Broadcast on a best-effort basis.
    pub const NOTIFY: Semantics = Semantics {
        broadcast: Some(true),
        best_effort: Some(true),
    };

    /// Fills the options left open here from `other`.
    pub fn or(self, other: Semantics) -> Semantics {
        Semantics {
            broadcast: self.broadcast.or(other.broadcast),
            best_effort: self.best_effort.or(other.best_effort),
        }
    }
}

impl Layer<BoxHandler> for Semantics {
    type Service = BoxHandler;

    fn layer(&self, inner: BoxHandler) -> BoxHandler {
        Arc::new(CallWith {
            inner,
            semantics: *self,
        })
    }
}

struct CallWith {
    inner: BoxHandler,
    semantics: Semantics,
}

impl Handler for CallWith {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        if callback.downcast_ref::<Composition>().is_some() {
            return self.inner.handle(callback, greedy, composer);
        }
        let greedy = self.semantics.broadcast.unwrap_or(greedy);
        let result = self.inner.handle(callback, greedy, composer);
        if self.semantics.best_effort != Some(true) {
            return result;
        }
        match result.error() {
            Some(err) if !err.is_not_handled() && !err.is_rejected() => result,
            _ => HandleResult::HANDLED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle_result::HandleResult;
    use crate::handler::HandlerFn;
    use crate::handler::{HandlerExt, Handlers};
    use crate::options::get_options;
    use crate::provides::Provides;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower_layer::Stack;

    fn empty() -> BoxHandler {
        Arc::new(HandlerFn::new(|_, _, _| HandleResult::NOT_HANDLED))
    }

    #[test]
    fn test_values_are_provided() {
        let handler = WithValues::new().value(7_u16).value("seven").layer(empty());
        let value = Arc::new(Provides::of::<u16>().build())
            .resolve(&handler)
            .unwrap()
            .ready()
            .flatten()
            .unwrap();
        assert_eq!(value.downcast_ref::<u16>(), Some(&7));
    }

    #[test]
    fn test_layers_stack() {
        let stack = Stack::new(SuppressFilters, WithValues::new().value(1_u8));
        let handler = stack.layer(empty());
        let options = get_options::<FilterOptions>(&handler).unwrap();
        assert_eq!(options.skip_filters, Some(true));
        assert!(
            Arc::new(Provides::of::<u8>().build())
                .resolve(&handler)
                .unwrap()
                .ready()
                .flatten()
                .is_some()
        );
    }

    struct Ping;

    fn counter(count: &Arc<AtomicUsize>) -> BoxHandler {
        let count = count.clone();
        Arc::new(HandlerFn::new(move |callback, _, _| {
            if callback.source().is_some_and(|s| s.is::<Ping>()) {
                count.fetch_add(1, Ordering::SeqCst);
                HandleResult::HANDLED
            } else {
                HandleResult::NOT_HANDLED
            }
        }))
    }

    #[test]
    fn test_broadcast_reaches_every_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler: BoxHandler = Arc::new(Handlers::new([counter(&count), counter(&count)]));
        handler.command(Ping).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handler.broadcast().command(Ping).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_best_effort_ignores_missing_handlers() {
        assert!(empty().command(Ping).unwrap_err().is_not_handled());
        assert!(empty().best_effort().command(Ping).is_ok());
        assert!(empty().notify().command(7_u8).is_ok());
    }

    #[test]
    fn test_semantics_fill_open_options() {
        let merged = Semantics::BEST_EFFORT.or(Semantics {
            broadcast: Some(false),
            best_effort: Some(false),
        });
        assert_eq!(merged.broadcast, Some(false));
        assert_eq!(merged.best_effort, Some(true));
    }
}
