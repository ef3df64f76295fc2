//! Filter pipeline wrapped around every binding call.
//!
//! A [`FilterProvider`] attached to a binding, a descriptor, a policy or
//! the options of the current handler chain produces [`Filter`]s. A handler
//! declared with `filter_self` filters its own bindings as well. Filters are ordered by
//! stage and invoked as a chain; each one decides whether to proceed with
//! [`Next::pipe`], reject with [`Next::abort`], or transform the output.
//!
//! ```text
//! logging(10) → validation(20) → authorization(30) → user(40) → lifestyle → binding
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! struct Audit;
//!
//! impl Filter for Audit {
//!     fn order(&self) -> i32 { stage::FILTER }
//!
//!     fn next(&self, next: Next, ctx: &HandleContext, _: &Arc<dyn FilterProvider>) -> Result<Output> {
//!         info!(callback = %ctx.callback().describe(), "audited");
//!         next.pipe()
//!     }
//! }
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::binding::{Binding, Output};
use crate::callback::Callback;
use crate::error::{Error, Result};
use crate::foundation::Deferred;
use crate::handle_context::HandleContext;
use crate::handler::{BoxHandler, IntoBoxHandler};
use crate::options::{Merge, WithOptions, get_options};

/// Well-known filter stages, lowest first.
pub mod stage {
    pub const LOGGING: i32 = 10;
    pub const VALIDATION: i32 = 20;
    pub const AUTHORIZATION: i32 = 30;
    pub const FILTER: i32 = 40;
    pub const LIFESTYLE: i32 = i32::MAX - 1000;
    pub const INITIALIZER: i32 = i32::MAX;
}

/// A stage of the pipeline around a binding.
pub trait Filter: Send + Sync + 'static {
    /// Stage of the filter. Negative stages run after every positive one.
    fn order(&self) -> i32;

    fn next(
        &self,
        next: Next,
        ctx: &HandleContext,
        provider: &Arc<dyn FilterProvider>,
    ) -> Result<Output>;
}

/// Produces the filters for a binding.
pub trait FilterProvider: Send + Sync + 'static {
    /// Required providers run even when filters are skipped and must yield
    /// at least one filter.
    fn required(&self) -> bool {
        false
    }

    fn applies_to(&self, _callback: &dyn Callback) -> bool {
        true
    }

    fn filters(
        &self,
        binding: &Binding,
        callback: &dyn Callback,
        composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>>;

    fn as_any(&self) -> &dyn Any;
}

/// A provider returning a fixed filter list.
#[derive(Clone)]
pub struct FilterSet {
    filters: Vec<Arc<dyn Filter>>,
    required: bool,
}

impl FilterSet {
    pub fn new(filters: impl IntoIterator<Item = Arc<dyn Filter>>) -> Self {
        Self {
            filters: filters.into_iter().collect(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl FilterProvider for FilterSet {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(self.filters.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// FilterOptions
// ============================================================================

/// Filter settings carried by the handler chain.
#[derive(Clone, Default)]
pub struct FilterOptions {
    /// Extra providers applied to every binding.
    pub providers: Vec<Arc<dyn FilterProvider>>,
    /// `Some(true)` keeps only required providers, `Some(false)` overrides
    /// a binding's own skip flag.
    pub skip_filters: Option<bool>,
    /// Observed before each stage and while awaiting pending outputs.
    pub token: Option<CancellationToken>,
}

impl FilterOptions {
    pub fn skip() -> Self {
        Self {
            skip_filters: Some(true),
            ..Self::default()
        }
    }

    pub fn providers(providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>) -> Self {
        Self {
            providers: providers.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn cancel_with(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            ..Self::default()
        }
    }
}

impl Merge for FilterOptions {
    fn merge(&mut self, other: &Self) {
        if self.skip_filters.is_none() {
            self.skip_filters = other.skip_filters;
        }
        if self.token.is_none() {
            self.token = other.token.clone();
        }
        for provider in &other.providers {
            if !self.providers.iter().any(|p| Arc::ptr_eq(p, provider)) {
                self.providers.push(provider.clone());
            }
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

type Entry = (Arc<dyn Filter>, Arc<dyn FilterProvider>);

/// Filters materialized for one binding call.
pub(crate) struct Pipeline {
    entries: Arc<[Entry]>,
    token: Option<CancellationToken>,
}

impl Pipeline {
    /// Collects and orders the filters for `binding`.
    ///
    /// Returns `None` when the binding must be skipped: a provider failed
    /// or a required provider produced nothing.
    pub(crate) fn build(
        binding: &Binding,
        callback: &dyn Callback,
        composer: &BoxHandler,
        extra: &[Arc<dyn FilterProvider>],
    ) -> Option<Self> {
        let options = get_options::<FilterOptions>(composer).unwrap_or_default();
        let only_required = options.skip_filters.unwrap_or(binding.skip_filters());

        let providers = binding
            .filters()
            .iter()
            .chain(extra)
            .chain(&options.providers)
            .filter(|p| p.applies_to(callback) && (!only_required || p.required()));

        let filter_composer = WithOptions::new(composer.clone(), FilterOptions::skip()).boxed();
        let mut entries: Vec<Entry> = Vec::new();
        for provider in providers {
            match provider.filters(binding, callback, &filter_composer) {
                Ok(filters) if filters.is_empty() && provider.required() => {
                    debug!(binding = %binding, "required filter provider produced no filters");
                    return None;
                }
                Ok(filters) => {
                    entries.extend(filters.into_iter().map(|f| (f, provider.clone())));
                }
                Err(err) => {
                    debug!(binding = %binding, error = %err, "filter provider failed");
                    return None;
                }
            }
        }
        entries.sort_by_key(|(filter, _)| {
            let order = filter.order();
            (order < 0, order)
        });
        trace!(binding = %binding, filters = entries.len(), "filters ordered");
        Some(Self {
            entries: entries.into(),
            token: options.token,
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Runs the pipeline and the binding.
    pub(crate) fn run(self, ctx: HandleContext) -> Result<Output> {
        let ctx = ctx.with_token(self.token.clone());
        let output = Next {
            ctx,
            entries: self.entries,
            index: 0,
        }
        .pipe()?;
        Ok(match (output, self.token) {
            (Output::Pending(pending), Some(token)) => Output::Pending(Deferred::from_future(
                async move { pending.wait_with(&token).await },
            )),
            (output, _) => output,
        })
    }
}

/// The rest of the pipeline after the current filter.
#[derive(Clone)]
pub struct Next {
    ctx: HandleContext,
    entries: Arc<[Entry]>,
    index: usize,
}

impl Next {
    /// Proceeds with the current context.
    pub fn pipe(self) -> Result<Output> {
        let ctx = self.ctx.clone();
        self.pipe_ctx(ctx)
    }

    /// Proceeds with a replacement context.
    pub fn pipe_ctx(self, ctx: HandleContext) -> Result<Output> {
        if ctx.is_canceled() {
            return Err(Error::canceled(Error::custom(format!(
                "dispatch of {} was canceled",
                ctx.callback().describe()
            ))));
        }
        let Some((filter, provider)) = self.entries.get(self.index).cloned() else {
            return guarded(|| ctx.binding().invoke(&ctx));
        };
        let next = Next {
            ctx: ctx.clone(),
            entries: self.entries,
            index: self.index + 1,
        };
        guarded(|| filter.next(next, &ctx, &provider))
    }

    /// Rejects the callback.
    pub fn abort(self) -> Result<Output> {
        Err(Error::rejected(self.ctx.callback().describe()))
    }

    /// Fails the pipeline with `err`.
    pub fn fail(self, err: Error) -> Result<Output> {
        Err(err)
    }

    pub fn context(&self) -> &HandleContext {
        &self.ctx
    }
}

fn guarded(f: impl FnOnce() -> Result<Output>) -> Result<Output> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| Err(Error::panic(panic)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Key;
    use crate::handle_result::HandleResult;
    use crate::handler::HandlerFn;
    use crate::policy::HANDLES;
    use crate::provides::Provides;
    use parking_lot::Mutex;

    struct Record {
        order: i32,
        seen: Arc<Mutex<Vec<i32>>>,
    }

    impl Filter for Record {
        fn order(&self) -> i32 {
            self.order
        }

        fn next(
            &self,
            next: Next,
            _ctx: &HandleContext,
            _provider: &Arc<dyn FilterProvider>,
        ) -> Result<Output> {
            self.seen.lock().push(self.order);
            next.pipe()
        }
    }

    struct Veto;

    impl Filter for Veto {
        fn order(&self) -> i32 {
            stage::AUTHORIZATION
        }

        fn next(
            &self,
            next: Next,
            _ctx: &HandleContext,
            _provider: &Arc<dyn FilterProvider>,
        ) -> Result<Output> {
            next.abort()
        }
    }

    fn context(binding: Binding) -> (HandleContext, BoxHandler) {
        let composer: BoxHandler = Arc::new(HandlerFn::new(|_, _, _| HandleResult::NOT_HANDLED));
        let callback = Arc::new(Provides::builder(Key::of::<u8>()).build());
        let ctx = HandleContext::new(None, callback, Arc::new(binding), composer.clone(), false);
        (ctx, composer)
    }

    fn record(order: i32, seen: &Arc<Mutex<Vec<i32>>>) -> Arc<dyn Filter> {
        Arc::new(Record {
            order,
            seen: seen.clone(),
        })
    }

    #[test]
    fn test_stage_order_with_negative_last() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider: Arc<dyn FilterProvider> = Arc::new(FilterSet::new([
            record(-1, &seen),
            record(stage::FILTER, &seen),
            record(stage::LOGGING, &seen),
            record(stage::FILTER, &seen),
        ]));
        let (ctx, composer) = context(Binding::stub(&HANDLES, Key::of::<u8>()));
        let pipeline =
            Pipeline::build(ctx.binding(), &**ctx.callback(), &composer, &[provider]).unwrap();
        // constraint filter at stage FILTER comes from the binding itself
        assert_eq!(pipeline.len(), 5);
        assert!(matches!(pipeline.run(ctx), Ok(Output::Ready(_))));
        assert_eq!(*seen.lock(), vec![stage::LOGGING, stage::FILTER, stage::FILTER, -1]);
    }

    #[test]
    fn test_abort_rejects() {
        let provider: Arc<dyn FilterProvider> = Arc::new(FilterSet::new([Arc::new(Veto) as _]));
        let (ctx, composer) = context(Binding::stub(&HANDLES, Key::of::<u8>()));
        let pipeline =
            Pipeline::build(ctx.binding(), &**ctx.callback(), &composer, &[provider]).unwrap();
        assert!(pipeline.run(ctx).unwrap_err().is_rejected());
    }

    #[test]
    fn test_skip_keeps_required_providers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let optional: Arc<dyn FilterProvider> = Arc::new(FilterSet::new([record(1, &seen)]));
        let (ctx, composer) = context(Binding::stub(&HANDLES, Key::of::<u8>()));
        let skipping: BoxHandler = Arc::new(WithOptions::new(composer, FilterOptions::skip()));
        let pipeline =
            Pipeline::build(ctx.binding(), &**ctx.callback(), &skipping, &[optional]).unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_required_provider_without_filters_skips_binding() {
        let empty: Arc<dyn FilterProvider> = Arc::new(FilterSet::new([]).required());
        let (ctx, composer) = context(Binding::stub(&HANDLES, Key::of::<u8>()));
        assert!(Pipeline::build(ctx.binding(), &**ctx.callback(), &composer, &[empty]).is_none());
    }

    #[test]
    fn test_canceled_pipeline() {
        let token = CancellationToken::new();
        token.cancel();
        let (ctx, composer) = context(Binding::stub(&HANDLES, Key::of::<u8>()));
        let canceling: BoxHandler =
            Arc::new(WithOptions::new(composer, FilterOptions::cancel_with(token)));
        let pipeline = Pipeline::build(ctx.binding(), &**ctx.callback(), &canceling, &[]).unwrap();
        assert!(pipeline.run(ctx).unwrap_err().is_canceled());
    }
}
