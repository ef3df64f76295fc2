//! Handler descriptors: the cached bindings of a handler type or function.
//!
//! A [`HandlerSpec`] is turned into a [`HandlerDescriptor`] once per
//! identity by the [`DescriptorFactory`]. Dispatching a callback to a
//! descriptor walks the bindings of the callback's policy in the order
//! the policy defines, guards against re-entry, runs the filter pipeline
//! around each binding and feeds the replies back into the callback.
//!
//! ```text
//! callback ─▶ PolicyBindings::reduce ─▶ guards ─▶ Pipeline ─▶ binding
//!                                                              │
//!            callback.receive_result ◀── Policy::accept_results ◀┘
//! ```

mod factory;
mod spec;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::binding::{Binding, BindingKind, Output, Reply};
use crate::callback::{CallbackGuard, CallbackRef, Received};
use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterProvider, FilterSet, Pipeline};
use crate::foundation::{Deferred, Payload, TypeKey};
use crate::handle_context::HandleContext;
use crate::handle_result::HandleResult;
use crate::handler::BoxHandler;
use crate::policy::{Policy, PolicyBindings, Variance};

pub use factory::{BindingObserver, DescriptorFactory};
pub use spec::{Describe, HandlerSpec, HandlerType};

/// Exposes a handler instance as a [`Filter`] around its own bindings.
pub type ReceiverFilter = fn(&Payload) -> Option<Arc<dyn Filter>>;

/// The bindings of one handler type or function, grouped by policy.
pub struct HandlerDescriptor {
    id: TypeKey,
    owner: Option<TypeKey>,
    bindings: BTreeMap<&'static str, PolicyBindings>,
    providers: Vec<Arc<dyn FilterProvider>>,
    receiver_filter: Option<ReceiverFilter>,
}

impl HandlerDescriptor {
    /// Indexes `bindings` by policy.
    pub(crate) fn new(
        id: TypeKey,
        owner: Option<TypeKey>,
        bindings: impl IntoIterator<Item = Arc<Binding>>,
        providers: Vec<Arc<dyn FilterProvider>>,
    ) -> Self {
        let mut grouped: BTreeMap<&'static str, PolicyBindings> = BTreeMap::new();
        for binding in bindings {
            let policy = binding.policy();
            grouped
                .entry(policy.name())
                .or_insert_with(|| PolicyBindings::new(policy))
                .insert(binding);
        }
        Self {
            id,
            owner,
            bindings: grouped,
            providers,
            receiver_filter: None,
        }
    }

    pub(crate) fn with_receiver_filter(mut self, receiver_filter: Option<ReceiverFilter>) -> Self {
        self.receiver_filter = receiver_filter;
        self
    }

    pub fn id(&self) -> TypeKey {
        self.id
    }

    /// The described handler type; `None` for function descriptors.
    pub fn owner(&self) -> Option<TypeKey> {
        self.owner
    }

    pub fn bindings(&self, policy: &dyn Policy) -> Option<&PolicyBindings> {
        self.bindings.get(policy.name())
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyBindings> {
        self.bindings.values()
    }

    /// Filter providers applied to every binding of the descriptor.
    pub fn providers(&self) -> &[Arc<dyn FilterProvider>] {
        &self.providers
    }

    /// Offers `callback` to every matching binding.
    ///
    /// `receiver` is the handler instance for method bindings. Constructor
    /// bindings are skipped when a receiver is present since the instance
    /// already answers for its own type. `guard` lets the caller refuse
    /// bindings in addition to the callback's own guard.
    pub fn dispatch(
        &self,
        receiver: Option<&Payload>,
        callback: &CallbackRef,
        greedy: bool,
        composer: &BoxHandler,
        guard: Option<&dyn CallbackGuard>,
    ) -> HandleResult {
        let policy = callback.policy();
        let Some(bindings) = self.bindings.get(policy.name()) else {
            return HandleResult::NOT_HANDLED;
        };
        let key = callback.key();
        bindings.reduce(&key, |binding, result| {
            if !policy.matches_key(binding.key(), &key, false) {
                return (result, false);
            }
            if receiver.is_some() && binding.kind() == BindingKind::Constructor {
                return (result, false);
            }
            let _handler_guard = match guard {
                Some(guard) => match guard.can_dispatch(receiver, binding) {
                    Some(approved) => Some(approved),
                    None => return (result, false),
                },
                None => None,
            };
            let Some(_callback_guard) = callback.can_dispatch(receiver, binding) else {
                return (result, false);
            };
            let ctx = HandleContext::new(
                receiver.cloned(),
                callback.clone(),
                binding.clone(),
                composer.clone(),
                greedy,
            );
            let Some(output) = self.invoke(binding, callback, composer, ctx.clone()) else {
                return (result, false);
            };
            let result = result.or(accept(policy, binding, output, &ctx));
            let stop = result.should_stop(greedy);
            (result, stop)
        })
    }

    /// Runs the binding, through its filters when the callback allows them.
    /// `None` means the pipeline could not be built and the binding is
    /// skipped.
    fn invoke(
        &self,
        binding: &Arc<Binding>,
        callback: &CallbackRef,
        composer: &BoxHandler,
        ctx: HandleContext,
    ) -> Option<Result<Output>> {
        trace!(binding = %binding, callback = %callback.describe(), "invoking binding");
        if !callback.can_filter() {
            return Some(binding.invoke(&ctx));
        }
        let sources = self.filter_sources(binding, &ctx);
        let pipeline = Pipeline::build(binding, &**callback, composer, &sources)?;
        Some(pipeline.run(ctx))
    }

    /// Providers beyond the binding's own: the descriptor's, the policy's
    /// and the receiver itself when it is a filter.
    fn filter_sources(&self, binding: &Binding, ctx: &HandleContext) -> Vec<Arc<dyn FilterProvider>> {
        let mut sources = self.providers.clone();
        sources.extend(binding.policy().filters().providers());
        if let Some(filter) = ctx
            .receiver()
            .zip(self.receiver_filter)
            .and_then(|(receiver, as_filter)| as_filter(receiver))
        {
            sources.push(Arc::new(FilterSet::new([filter])));
        }
        sources
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("policies", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Acceptance
// ============================================================================

/// Turns a binding's output into a dispatch result.
fn accept(
    policy: &'static dyn Policy,
    binding: &Arc<Binding>,
    output: Result<Output>,
    ctx: &HandleContext,
) -> HandleResult {
    let strict = policy.is_strict() || binding.is_strict();
    let callback = ctx.callback();
    let composer = ctx.composer();
    match output {
        Ok(Output::Ready(reply)) => {
            let accepted = policy.accept_results(&reply);
            if !accepted.is_handled() || accepted.is_error() {
                return accepted;
            }
            let (values, effects) = reply.into_parts();
            let mut result = accepted;
            if !values.is_empty() {
                let received = values.into_iter().fold(HandleResult::NOT_HANDLED, |r, value| {
                    r.or(callback.receive_result(Received::Value(value), strict, composer))
                });
                result = result.and(received);
            }
            if !result.is_handled() {
                return result;
            }
            match apply_effects(&effects, ctx) {
                Ok(pending) if pending.is_empty() => result,
                Ok(pending) => {
                    let settled = Deferred::all(pending).then(|_| Vec::new());
                    result.and(callback.receive_result(Received::Pending(settled), strict, composer))
                }
                Err(err) => result.with_error(err),
            }
        }
        Ok(Output::Pending(pending)) => {
            let effect_ctx = ctx.clone();
            let values = pending.and_then(move |reply| settle(policy, reply, &effect_ctx));
            HandleResult::HANDLED.and(callback.receive_result(Received::Pending(values), strict, composer))
        }
        Err(err) => refuse(policy, binding, err),
    }
}

/// Accepts a reply that completed asynchronously.
fn settle(policy: &'static dyn Policy, reply: Reply, ctx: &HandleContext) -> Deferred<Vec<Payload>> {
    let accepted = policy.accept_results(&reply);
    if let Some(err) = accepted.error() {
        return Deferred::rejected(err.clone());
    }
    let (values, effects) = reply.into_parts();
    let values = if accepted.is_handled() { values } else { Vec::new() };
    match apply_effects(&effects, ctx) {
        Ok(pending) if pending.is_empty() => Deferred::resolved(values),
        Ok(pending) => Deferred::all(pending).then(move |_| values),
        Err(err) => Deferred::rejected(err),
    }
}

fn apply_effects(effects: &[Arc<dyn Effect>], ctx: &HandleContext) -> Result<Vec<Deferred<()>>> {
    let mut pending = Vec::new();
    for effect in effects {
        if let Some(deferred) = effect.apply(ctx)? {
            pending.push(deferred);
        }
    }
    Ok(pending)
}

/// Maps a failed invocation to a dispatch result.
///
/// Rejections and missing handlers only skip the binding. Unresolved
/// arguments skip covariant bindings, so a provider with missing
/// dependencies simply does not provide, and fail everything else.
fn refuse(policy: &dyn Policy, binding: &Binding, err: Error) -> HandleResult {
    let skip = err.is_not_handled()
        || err.is_rejected()
        || (err.is_unresolved_arg() && policy.variance() == Variance::Covariant);
    if skip {
        debug!(binding = %binding, reason = %err, "binding skipped");
        HandleResult::NOT_HANDLED
    } else {
        debug!(binding = %binding, error = %err, "binding failed");
        HandleResult::NOT_HANDLED.with_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Dep;
    use crate::callback::{Callback, Resolution};
    use crate::filter::{Next, stage};
    use crate::handler::{Handler, HandlerFn, Instance};
    use crate::handles::Handles;
    use crate::policy::HANDLES;
    use crate::provides::Provides;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    struct Bump(usize);
    struct Fail;
    struct Report;

    impl Counter {
        fn bump(&self, bump: &Bump) -> usize {
            self.hits.fetch_add(bump.0, Ordering::SeqCst) + bump.0
        }

        fn also_bump(&self, _bump: &Bump) {
            self.hits.fetch_add(100, Ordering::SeqCst);
        }

        fn fail(&self, _fail: &Fail) -> Result<()> {
            Err(Error::custom("boom"))
        }

        fn report(&self, _report: &Report, label: Dep<String>) -> String {
            format!("{}={}", *label, self.hits.load(Ordering::SeqCst))
        }

        fn later(&self, bump: &Bump) -> Deferred<usize> {
            let n = bump.0;
            Deferred::spawn(async move { Ok(n * 2) })
        }
    }

    impl Describe for Counter {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .default_constructor()
                .handles(Counter::bump)
                .handles(Counter::also_bump)
                .handles(Counter::fail)
                .handles(Counter::report)
        }
    }

    fn instance(factory: &DescriptorFactory) -> (Arc<Counter>, BoxHandler) {
        let counter = Arc::new(Counter::default());
        let handler = Instance::with_factory(factory, counter.clone()).unwrap();
        (counter, Arc::new(handler))
    }

    #[test]
    fn test_non_greedy_stops_at_first_binding() {
        let factory = DescriptorFactory::new();
        let (counter, handler) = instance(&factory);
        let callback: CallbackRef = Arc::new(Handles::new(Bump(1)));
        assert!(handler.handle(&callback, false, &handler).is_handled());
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
        let Resolution::Ready(Some(result)) = callback.base().result() else {
            panic!("expected a result");
        };
        assert_eq!(*result.downcast_ref::<usize>().unwrap(), 1);

        let callback: CallbackRef = Arc::new(Handles::new(Bump(1)));
        handler.handle(&callback, true, &handler);
        assert_eq!(counter.hits.load(Ordering::SeqCst), 102);
    }

    #[test]
    fn test_errors_are_attached_to_the_result() {
        let factory = DescriptorFactory::new();
        let (_, handler) = instance(&factory);
        let callback: CallbackRef = Arc::new(Handles::new(Fail));
        let result = handler.handle(&callback, false, &handler);
        assert!(result.is_stop());
        assert_eq!(result.error().map(ToString::to_string), Some("boom".to_string()));
    }

    #[test]
    fn test_unresolved_arguments_fail_contravariant_bindings() {
        let factory = DescriptorFactory::new();
        let (_, handler) = instance(&factory);
        let callback: CallbackRef = Arc::new(Handles::new(Report));
        let result = handler.handle(&callback, false, &handler);
        assert!(result.error().is_some_and(Error::is_unresolved_arg));
    }

    #[test]
    fn test_constructor_is_skipped_for_instances() {
        let factory = DescriptorFactory::new();
        let (counter, handler) = instance(&factory);
        let provides = Arc::new(Provides::of::<Counter>().many(true).build());
        let callback: CallbackRef = provides.clone();
        assert!(handler.handle(&callback, true, &handler).is_handled());
        let Resolution::Ready(values) = provides.base().results() else {
            panic!("expected ready values");
        };
        assert_eq!(values.len(), 1);
        assert!(Arc::ptr_eq(&values[0].downcast::<Counter>().unwrap(), &counter));
    }

    #[test]
    fn test_dispatch_without_receiver_uses_the_constructor() {
        let factory = DescriptorFactory::new();
        let descriptor = factory.register::<Counter>().unwrap();
        let provides = Arc::new(Provides::of::<Counter>().build());
        let callback: CallbackRef = provides.clone();
        let composer: BoxHandler = Arc::new(HandlerFn::new(|_, _, _| HandleResult::NOT_HANDLED));
        assert!(
            descriptor
                .dispatch(None, &callback, false, &composer, None)
                .is_handled()
        );
        assert!(matches!(provides.base().result(), Resolution::Ready(Some(_))));
    }

    #[tokio::test]
    async fn test_pending_replies_settle_into_the_callback() {
        let factory = DescriptorFactory::new();
        let spec: HandlerSpec = HandlerType::<Counter>::new().handles(Counter::later).into();
        let (descriptor, added) = factory.register_spec(spec).unwrap();
        assert!(added);
        let receiver = Payload::from_arc(Arc::new(Counter::default()));
        let callback: CallbackRef = Arc::new(Handles::new(Bump(4)));
        let composer: BoxHandler = Arc::new(HandlerFn::new(|_, _, _| HandleResult::NOT_HANDLED));
        let result = descriptor.dispatch(Some(&receiver), &callback, false, &composer, None);
        assert!(result.is_handled());
        let value = callback.base().result().into_deferred().await.unwrap().unwrap();
        assert_eq!(*value.downcast_ref::<usize>().unwrap(), 8);
    }

    #[test]
    fn test_handler_guard_can_refuse_bindings() {
        struct Refuse(Mutex<usize>);
        impl CallbackGuard for Refuse {
            fn can_dispatch(
                &self,
                _receiver: Option<&Payload>,
                _binding: &Arc<Binding>,
            ) -> Option<crate::callback::DispatchGuard> {
                *self.0.lock() += 1;
                None
            }
        }
        let factory = DescriptorFactory::new();
        let descriptor = factory.register::<Counter>().unwrap();
        let receiver = Payload::from_arc(Arc::new(Counter::default()));
        let callback: CallbackRef = Arc::new(Handles::new(Bump(1)));
        let composer: BoxHandler = Arc::new(HandlerFn::new(|_, _, _| HandleResult::NOT_HANDLED));
        let guard = Refuse(Mutex::new(0));
        let result = descriptor.dispatch(Some(&receiver), &callback, true, &composer, Some(&guard));
        assert!(!result.is_handled());
        assert_eq!(*guard.0.lock(), 2);
    }

    struct Pass;

    #[derive(Default)]
    struct Gate {
        open: AtomicBool,
        checked: AtomicUsize,
        passed: AtomicUsize,
    }

    impl Gate {
        fn pass(&self, _pass: &Pass) {
            self.passed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Filter for Gate {
        fn order(&self) -> i32 {
            stage::FILTER
        }

        fn next(&self, next: Next, _ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
            self.checked.fetch_add(1, Ordering::SeqCst);
            if self.open.load(Ordering::SeqCst) {
                next.pipe()
            } else {
                next.abort()
            }
        }
    }

    impl Describe for Gate {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.filter_self().handles(Gate::pass)
        }
    }

    #[test]
    fn test_handler_filters_its_own_bindings() {
        let factory = DescriptorFactory::new();
        let gate = Arc::new(Gate::default());
        let handler: BoxHandler = Arc::new(Instance::with_factory(&factory, gate.clone()).unwrap());
        let callback: CallbackRef = Arc::new(Handles::new(Pass));

        assert!(!handler.handle(&callback, false, &handler).is_handled());
        assert_eq!(gate.passed.load(Ordering::SeqCst), 0);

        gate.open.store(true, Ordering::SeqCst);
        let callback: CallbackRef = Arc::new(Handles::new(Pass));
        assert!(handler.handle(&callback, false, &handler).is_handled());
        assert_eq!(gate.checked.load(Ordering::SeqCst), 2);
        assert_eq!(gate.passed.load(Ordering::SeqCst), 1);
    }

    struct Tally;

    #[derive(Default)]
    struct Tallies;

    impl Tallies {
        fn tally(&self, _tally: &Tally) -> usize {
            1
        }
    }

    impl Describe for Tallies {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Tallies::tally)
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Filter for Counting {
        fn order(&self) -> i32 {
            stage::FILTER
        }

        fn next(&self, next: Next, _ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.pipe()
        }
    }

    struct TallyFilters(Arc<AtomicUsize>);

    impl FilterProvider for TallyFilters {
        fn applies_to(&self, callback: &dyn Callback) -> bool {
            callback.source().is_some_and(|source| source.is::<Tally>())
        }

        fn filters(
            &self,
            _binding: &Binding,
            _callback: &dyn Callback,
            _composer: &BoxHandler,
        ) -> Result<Vec<Arc<dyn Filter>>> {
            Ok(vec![Arc::new(Counting(self.0.clone()))])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_policy_filters_wrap_every_binding() {
        let factory = DescriptorFactory::new();
        let counted = Arc::new(AtomicUsize::new(0));
        let provider: Arc<dyn FilterProvider> = Arc::new(TallyFilters(counted.clone()));
        HANDLES.filters().add([provider.clone()]);

        let handler: BoxHandler = Arc::new(Instance::with_factory(&factory, Arc::new(Tallies)).unwrap());
        let callback: CallbackRef = Arc::new(Handles::new(Tally));
        assert!(handler.handle(&callback, false, &handler).is_handled());
        assert_eq!(counted.load(Ordering::SeqCst), 1);

        HANDLES.filters().remove(&provider);
        let callback: CallbackRef = Arc::new(Handles::new(Tally));
        assert!(handler.handle(&callback, false, &handler).is_handled());
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }
}
