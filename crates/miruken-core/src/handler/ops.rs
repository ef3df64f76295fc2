//! The typed operations available on every handler.
//!
//! ```rust,ignore
//! use miruken_core::prelude::*;
//!
//! handler.command(PlaceOrder::new(42))?;
//! let quote: Arc<Quote> = handler.execute(GetQuote::new("MSFT"))?.await?;
//! let clock = handler.resolve::<Clock>()?.ready().flatten();
//! ```

use std::sync::Arc;

use tower_layer::Layer;

use crate::authorizes::{self, Subject};
use crate::batch::{self, NoBatch};
use crate::callback::{Callback, Resolution};
use crate::context::Context;
use crate::creates::Creates;
use crate::error::{Error, Result};
use crate::filter::{FilterOptions, FilterProvider};
use crate::foundation::{Deferred, Key, Payload};
use crate::handles::Handles;
use crate::maps::Maps;
use crate::options::{self, Merge};
use crate::provides::Provides;
use crate::validates::{self, Outcome};

use super::{BoxHandler, FilterLayer, OptionsLayer, Semantics, SuppressFilters, WithValues};

/// Typed dispatch helpers.
///
/// Implemented for [`BoxHandler`] and [`Context`]. Results that may still
/// be computing come back as a [`Resolution`], which is ready for purely
/// synchronous handlers and can be awaited either way.
pub trait HandlerExt {
    /// The handler operations dispatch through.
    fn handler(&self) -> BoxHandler;

    // ─── Commands ───────────────────────────────────────────────────────────

    /// Sends `message` to the first handler that accepts it.
    fn command<M: Send + Sync + 'static>(&self, message: M) -> Result<Resolution<()>> {
        Ok(Arc::new(Handles::new(message))
            .execute(&self.handler(), false)?
            .map(|_| ()))
    }

    /// Sends `message` to every handler that accepts it.
    fn command_all<M: Send + Sync + 'static>(&self, message: M) -> Result<Resolution<()>> {
        Ok(Arc::new(Handles::new(message))
            .execute(&self.handler(), true)?
            .map(|_| ()))
    }

    /// Sends `message` and returns the first response of type `T`.
    fn execute<T, M>(&self, message: M) -> Result<Resolution<Arc<T>>>
    where
        T: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        let describe = format!("handles {}", std::any::type_name::<M>());
        Arc::new(Handles::new(message))
            .execute(&self.handler(), false)?
            .try_map(move |values| {
                values
                    .iter()
                    .find_map(Payload::cast::<T>)
                    .ok_or_else(|| Error::not_handled(describe))
            })
    }

    /// Sends `message` to every handler and collects the responses of type `T`.
    fn execute_all<T, M>(&self, message: M) -> Result<Resolution<Vec<Arc<T>>>>
    where
        T: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        Ok(Arc::new(Handles::new(message))
            .execute(&self.handler(), true)?
            .map(cast_all::<T>))
    }

    // ─── Resolution ─────────────────────────────────────────────────────────

    fn resolve<T: Send + Sync + 'static>(&self) -> Result<Resolution<Option<Arc<T>>>> {
        Ok(Arc::new(Provides::of::<T>().build())
            .resolve(&self.handler())?
            .map(|value| value.and_then(|v| v.cast::<T>())))
    }

    /// Resolves the value registered under `key`, typically a name.
    fn resolve_key<T: Send + Sync + 'static>(&self, key: impl Into<Key>) -> Result<Resolution<Option<Arc<T>>>> {
        Ok(Arc::new(Provides::builder(key).build())
            .resolve(&self.handler())?
            .map(|value| value.and_then(|v| v.cast::<T>())))
    }

    fn resolve_all<T: Send + Sync + 'static>(&self) -> Result<Resolution<Vec<Arc<T>>>> {
        Ok(Arc::new(Provides::of::<T>().many(true).build())
            .resolve_all(&self.handler())?
            .map(cast_all::<T>))
    }

    /// Builds a new `T`; fails when no factory can.
    fn create<T: Send + Sync + 'static>(&self) -> Result<Resolution<Arc<T>>> {
        let creates = Arc::new(Creates::of::<T>());
        run(&self.handler(), creates.clone(), false)?;
        creates.base().results().try_map(first::<T>)
    }

    fn create_all<T: Send + Sync + 'static>(&self) -> Result<Resolution<Vec<Arc<T>>>> {
        let creates = Arc::new(Creates::new(Key::of::<T>(), true));
        run(&self.handler(), creates.clone(), true)?;
        Ok(creates.base().results().map(cast_all::<T>))
    }

    // ─── Maps ───────────────────────────────────────────────────────────────

    /// Maps `source` into a `T`.
    fn map<T, S>(&self, source: S) -> Result<Resolution<Arc<T>>>
    where
        T: Send + Sync + 'static,
        S: Send + Sync + 'static,
    {
        let maps = Arc::new(Maps::to::<T>(Payload::new(source)));
        run(&self.handler(), maps.clone(), false)?;
        maps.base().results().try_map(first::<T>)
    }

    /// Maps `source` into the target named by `key`, such as a format.
    fn map_key<S: Send + Sync + 'static>(&self, source: S, key: impl Into<Key>) -> Result<Resolution<Payload>> {
        let maps = Arc::new(Maps::new(Payload::new(source), key, false));
        run(&self.handler(), maps.clone(), false)?;
        let describe = maps.describe();
        maps.base()
            .results()
            .try_map(move |values| values.into_iter().next().ok_or_else(|| Error::not_handled(describe)))
    }

    /// Every mapping of `source` into a `T`.
    fn map_all<T, S>(&self, source: S) -> Result<Resolution<Vec<Arc<T>>>>
    where
        T: Send + Sync + 'static,
        S: Send + Sync + 'static,
    {
        let maps = Arc::new(Maps::new(Payload::new(source), Key::of::<T>(), true));
        run(&self.handler(), maps.clone(), true)?;
        Ok(maps.base().results().map(cast_all::<T>))
    }

    // ─── Options ────────────────────────────────────────────────────────────

    fn get_options<T: Merge>(&self) -> Option<T> {
        options::get_options::<T>(&self.handler())
    }

    fn with_options<T: Merge>(&self, options: T) -> BoxHandler {
        self.layer(OptionsLayer::new(options))
    }

    fn suppress_filters(&self) -> BoxHandler {
        self.layer(SuppressFilters)
    }

    fn with_filter_options(&self, options: FilterOptions) -> BoxHandler {
        self.layer(FilterLayer::new(options))
    }

    /// Applies `providers` to every binding reached through the result.
    fn provide_filters(&self, providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>) -> BoxHandler {
        self.layer(FilterLayer::providers(providers))
    }

    /// Provides `value` ahead of this handler.
    fn with<T: Send + Sync + 'static>(&self, value: T) -> BoxHandler {
        self.layer(WithValues::new().value(value))
    }

    /// Dispatches with `semantics` below this point.
    fn call_with(&self, semantics: Semantics) -> BoxHandler {
        self.layer(semantics)
    }

    fn broadcast(&self) -> BoxHandler {
        self.call_with(Semantics::BROADCAST)
    }

    fn best_effort(&self) -> BoxHandler {
        self.call_with(Semantics::BEST_EFFORT)
    }

    /// Broadcasts and treats unhandled callbacks as handled.
    fn notify(&self) -> BoxHandler {
        self.call_with(Semantics::NOTIFY)
    }

    fn layer<L>(&self, layer: L) -> BoxHandler
    where
        L: Layer<BoxHandler, Service = BoxHandler>,
    {
        layer.layer(self.handler())
    }

    // ─── Batching ───────────────────────────────────────────────────────────

    fn batch<F>(&self, configure: F) -> Result<Deferred<Vec<Payload>>>
    where
        F: FnOnce(&BoxHandler) -> Result<()>,
    {
        batch::batch(&self.handler(), configure)
    }

    fn batch_async<T, F>(&self, configure: F) -> Result<Deferred<Vec<Payload>>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&BoxHandler) -> Result<Deferred<T>>,
    {
        batch::batch_async(&self.handler(), configure)
    }

    fn batch_tag<T: 'static, F>(&self, configure: F) -> Result<Deferred<Vec<Payload>>>
    where
        F: FnOnce(&BoxHandler) -> Result<()>,
    {
        batch::batch_tag::<T, F>(&self.handler(), configure)
    }

    /// Dispatches past any batch that is open.
    fn no_batch(&self) -> BoxHandler {
        Arc::new(NoBatch::new(self.handler()))
    }

    // ─── Validation and authorization ───────────────────────────────────────

    fn validate<T: Send + Sync + 'static>(&self, target: T) -> Result<Resolution<Outcome>> {
        validates::validate(&self.handler(), Payload::new(target))
    }

    fn authorize<A: Send + Sync + 'static>(&self, action: A, subject: &Subject) -> Result<Resolution<bool>> {
        authorizes::authorize(&self.handler(), Payload::new(action), subject)
    }
}

impl HandlerExt for BoxHandler {
    fn handler(&self) -> BoxHandler {
        self.clone()
    }
}

impl HandlerExt for Context {
    fn handler(&self) -> BoxHandler {
        self.boxed()
    }
}

fn run(handler: &BoxHandler, callback: Arc<dyn Callback>, greedy: bool) -> Result<()> {
    let describe = callback.describe();
    let result = super::dispatch(handler, &callback, greedy);
    let handled = result.is_handled();
    match result.into_error() {
        Some(err) => Err(err),
        None if !handled => Err(Error::not_handled(describe)),
        None => Ok(()),
    }
}

fn first<T: Send + Sync + 'static>(values: Vec<Payload>) -> Result<Arc<T>> {
    values
        .iter()
        .find_map(Payload::cast::<T>)
        .ok_or_else(|| Error::not_handled(std::any::type_name::<T>()))
}

fn cast_all<T: Send + Sync + 'static>(values: Vec<Payload>) -> Vec<Arc<T>> {
    values.iter().filter_map(Payload::cast::<T>).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Anchor, IntoReply};
    use crate::constraint::Named;
    use crate::descriptor::{Describe, DescriptorFactory, HandlerType};
    use crate::foundation::lineage;
    use crate::handler::{Instance, IntoBoxHandler};

    #[derive(Debug, PartialEq)]
    struct Quote(u32);

    impl IntoReply for Quote {}

    struct GetQuote(&'static str);
    struct Ping;

    #[derive(Default)]
    struct Exchange;

    impl Exchange {
        fn quote(&self, request: &GetQuote) -> Quote {
            Quote(request.0.len() as u32)
        }

        fn ping(&self, _ping: &Ping) {}

        fn listing(&self) -> Quote {
            Quote(1)
        }

        fn price(&self, quote: &Quote) -> String {
            format!("${}", quote.0)
        }
    }

    impl Describe for Exchange {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .default_constructor()
                .handles(Exchange::quote)
                .handles(Exchange::ping)
                .provides(Exchange::listing)
                .maps(Exchange::price)
                .provides_with(Anchor::new().key("primary"), |_: &Exchange| Quote(9))
                .provides_with(Anchor::new().named("backup"), |_: &Exchange| Quote(7))
        }
    }

    fn exchange() -> BoxHandler {
        Instance::with_factory(&DescriptorFactory::new(), Arc::new(Exchange))
            .unwrap()
            .boxed()
    }

    #[test]
    fn test_commands_and_execution() {
        let handler = exchange();
        assert!(handler.command(Ping).is_ok());
        let quote = handler.execute::<Quote, _>(GetQuote("MSFT")).unwrap().ready().unwrap();
        assert_eq!(*quote, Quote(4));
        assert!(handler.command(Quote(1)).unwrap_err().is_not_handled());
    }

    #[test]
    fn test_resolution_and_maps() {
        let handler = exchange();
        let quotes = handler.resolve_all::<Quote>().unwrap().ready().unwrap();
        assert_eq!(quotes.len(), 2);
        let primary = handler.resolve_key::<Quote>("primary").unwrap().ready().flatten();
        assert_eq!(primary.as_deref(), Some(&Quote(9)));
        assert!(handler.resolve_key::<Quote>("backup").unwrap().ready().flatten().is_none());

        let backup = Arc::new(Provides::of::<Quote>().constraint(Named::new("backup")).build())
            .resolve(&handler)
            .unwrap()
            .ready()
            .flatten()
            .and_then(|value| value.cast::<Quote>());
        assert_eq!(backup.as_deref(), Some(&Quote(7)));
        let price = handler.map::<String, _>(Quote(12)).unwrap().ready().unwrap();
        assert_eq!(price.as_str(), "$12");
    }

    struct Mammal;
    struct Feline;
    struct Canine;

    impl IntoReply for Mammal {}
    impl IntoReply for Feline {}
    impl IntoReply for Canine {}

    struct Zoo;

    impl Describe for Zoo {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .provides(|_: &Zoo| Feline)
                .provides(|_: &Zoo| Mammal)
                .provides(|_: &Zoo| Canine)
        }
    }

    #[test]
    fn test_resolve_all_reaches_every_subtype_provider() {
        lineage::declare::<Feline, Mammal, _>(|_| Mammal);
        lineage::declare::<Canine, Mammal, _>(|_| Mammal);
        let handler = Instance::with_factory(&DescriptorFactory::new(), Arc::new(Zoo))
            .unwrap()
            .boxed();
        let mammals = handler.resolve_all::<Mammal>().unwrap().ready().unwrap();
        assert_eq!(mammals.len(), 3);
        let felines = handler.resolve_all::<Feline>().unwrap().ready().unwrap();
        assert_eq!(felines.len(), 1);
    }

    #[test]
    fn test_with_provides_values() {
        let handler = exchange().with(String::from("nyse"));
        let name = handler.resolve::<String>().unwrap().ready().flatten();
        assert_eq!(name.as_deref().map(String::as_str), Some("nyse"));
    }
}
