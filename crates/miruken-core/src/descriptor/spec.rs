//! Builders declaring the bindings of a handler type or a free function.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::{
    Anchor, Binding, BindingKind, Callable, Constructor, Format, IntoReply, ProviderFn,
    ProviderMethod, SourceFn, SourceMethod, TryConstructor,
};
use crate::error::Error;
use crate::filter::{Filter, FilterProvider};
use crate::foundation::{Key, Payload, TypeKey};
use crate::policy::{AUTHORIZES, CREATES, HANDLES, MAPS, PROVIDES, Policy, VALIDATES};

use super::ReceiverFilter;

/// A handler type that can describe its own bindings.
///
/// ```rust,ignore
/// impl Describe for Quotes {
///     fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
///         handler
///             .constructor(Quotes::new)
///             .handles(Quotes::quote)
///             .provides_with(Anchor::new().single(), Quotes::exchange)
///     }
/// }
/// ```
pub trait Describe: Send + Sync + Sized + 'static {
    fn describe(handler: HandlerType<Self>) -> HandlerType<Self>;
}

// ============================================================================
// HandlerSpec
// ============================================================================

/// Everything needed to build a descriptor: the identity of the handler
/// type or function and its declared bindings.
pub struct HandlerSpec {
    pub(crate) id: TypeKey,
    pub(crate) owner: Option<TypeKey>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) providers: Vec<Arc<dyn FilterProvider>>,
    pub(crate) receiver_filter: Option<ReceiverFilter>,
    pub(crate) errors: Vec<Error>,
}

impl HandlerSpec {
    /// Spec of the handler type `H`, built from its [`Describe`] impl.
    pub fn of<H: Describe>() -> Self {
        H::describe(HandlerType::new()).into()
    }

    /// Identity used to cache the descriptor.
    pub fn id(&self) -> TypeKey {
        self.id
    }

    /// Handler type described by this spec; `None` for functions.
    pub fn owner(&self) -> Option<TypeKey> {
        self.owner
    }

    /// A free function handling the callback source `M`.
    pub fn handles_fn<F, M, Args>(anchor: Anchor, f: F) -> Self
    where
        F: SourceFn<M, Args>,
        M: Send + Sync + 'static,
    {
        Self::source_policy_fn(&HANDLES, anchor, f)
    }

    /// A free function validating the callback source `M`.
    pub fn validates_fn<F, M, Args>(anchor: Anchor, f: F) -> Self
    where
        F: SourceFn<M, Args>,
        M: Send + Sync + 'static,
    {
        Self::source_policy_fn(&VALIDATES, anchor, f)
    }

    /// A free function providing its return type.
    pub fn provides_fn<F, Args>(anchor: Anchor, f: F) -> Self
    where
        F: ProviderFn<Args>,
    {
        Self::provider_fn(&PROVIDES, anchor, f)
    }

    /// A free function creating its return type.
    pub fn creates_fn<F, Args>(anchor: Anchor, f: F) -> Self
    where
        F: ProviderFn<Args>,
    {
        Self::provider_fn(&CREATES, anchor, f)
    }

    /// A free function mapping `M` into its return type.
    pub fn maps_fn<F, M, Args>(anchor: Anchor, f: F) -> Self
    where
        F: SourceFn<M, Args>,
        M: Send + Sync + 'static,
    {
        match maps_key::<M, F::Output>(&anchor) {
            Ok(key) => {
                let callable = source_fn::<F, M, Args>(f, key.clone(), anchor.strict);
                Self::function::<F>(&MAPS, callable, anchor.key(key))
            }
            Err(reason) => Self::failed::<F>(reason),
        }
    }

    fn source_policy_fn<F, M, Args>(policy: &'static dyn Policy, anchor: Anchor, f: F) -> Self
    where
        F: SourceFn<M, Args>,
        M: Send + Sync + 'static,
    {
        let callable = source_fn::<F, M, Args>(f, Key::of::<M>(), anchor.strict);
        Self::function::<F>(policy, callable, anchor)
    }

    fn provider_fn<F, Args>(policy: &'static dyn Policy, anchor: Anchor, f: F) -> Self
    where
        F: ProviderFn<Args>,
    {
        let key = anchor.key.clone().or_else(|| output_key::<F::Output>(anchor.strict));
        let Some(key) = key else {
            return Self::failed::<F>(NO_OUTPUT_KEY);
        };
        let callable = Callable {
            kind: BindingKind::Function,
            owner: None,
            name: type_name::<F>(),
            key,
            is_async: F::Output::is_async(),
            logical_output: logical_output::<F::Output>(),
            plan: F::plan(),
            invoker: f.into_invoker(anchor.strict),
        };
        Self::function::<F>(policy, callable, anchor)
    }

    fn failed<F: 'static>(reason: &str) -> Self {
        Self {
            id: TypeKey::of::<F>(),
            owner: None,
            bindings: Vec::new(),
            providers: Vec::new(),
            receiver_filter: None,
            errors: vec![binding_error::<F>(reason)],
        }
    }

    fn function<F: 'static>(policy: &'static dyn Policy, callable: Callable, anchor: Anchor) -> Self {
        Self {
            id: TypeKey::of::<F>(),
            owner: None,
            bindings: vec![Binding::build(policy, callable, anchor)],
            providers: Vec::new(),
            receiver_filter: None,
            errors: Vec::new(),
        }
    }
}

impl<H: Send + Sync + 'static> From<HandlerType<H>> for HandlerSpec {
    fn from(handler: HandlerType<H>) -> Self {
        let mut bindings = handler.bindings;
        if let Some((anchor, callable)) = handler.constructor {
            bindings.push(Binding::build(&PROVIDES, callable.clone(), anchor.clone()));
            bindings.push(Binding::build(&CREATES, callable, anchor));
        }
        Self {
            id: TypeKey::of::<H>(),
            owner: Some(TypeKey::of::<H>()),
            bindings,
            providers: handler.providers,
            receiver_filter: handler.receiver_filter,
            errors: handler.errors,
        }
    }
}

// ============================================================================
// HandlerType
// ============================================================================

/// Declares the bindings of the handler type `H`.
///
/// A type has no constructor until one is declared; without one it can
/// only take part in dispatch as an instance.
pub struct HandlerType<H> {
    bindings: Vec<Binding>,
    providers: Vec<Arc<dyn FilterProvider>>,
    receiver_filter: Option<ReceiverFilter>,
    errors: Vec<Error>,
    constructor: Option<(Anchor, Callable)>,
    _marker: PhantomData<fn() -> H>,
}

const NO_OUTPUT_KEY: &str = "return type has no key, declare one with Anchor::key";

impl<H: Send + Sync + 'static> HandlerType<H> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            providers: Vec::new(),
            receiver_filter: None,
            errors: Vec::new(),
            constructor: None,
            _marker: PhantomData,
        }
    }

    // ─── Constructors ───────────────────────────────────────────────────────

    pub fn constructor<F, Args>(self, f: F) -> Self
    where
        F: Constructor<H, Args>,
    {
        self.constructor_with(Anchor::new(), f)
    }

    /// Declares the constructor with lifestyle, constraints or filters.
    pub fn constructor_with<F, Args>(mut self, anchor: Anchor, f: F) -> Self
    where
        F: Constructor<H, Args>,
    {
        let callable = constructor_callable::<H, F>(F::plan(), f.into_invoker());
        self.constructor = Some((anchor, callable));
        self
    }

    pub fn try_constructor<F, Args>(self, f: F) -> Self
    where
        F: TryConstructor<H, Args>,
    {
        self.try_constructor_with(Anchor::new(), f)
    }

    pub fn try_constructor_with<F, Args>(mut self, anchor: Anchor, f: F) -> Self
    where
        F: TryConstructor<H, Args>,
    {
        let callable = constructor_callable::<H, F>(F::plan(), f.into_invoker());
        self.constructor = Some((anchor, callable));
        self
    }

    /// Builds instances with [`Default`].
    pub fn default_constructor(self) -> Self
    where
        H: Default,
    {
        self.constructor(H::default)
    }

    /// Forbids construction, undoing any constructor declared earlier.
    pub fn no_constructor(mut self) -> Self {
        self.constructor = None;
        self
    }

    // ─── Bindings ───────────────────────────────────────────────────────────

    pub fn handles<F, M, Args>(self, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.handles_with(Anchor::new(), f)
    }

    pub fn handles_with<F, M, Args>(self, anchor: Anchor, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.source_binding(&HANDLES, anchor, f)
    }

    pub fn provides<F, Args>(self, f: F) -> Self
    where
        F: ProviderMethod<H, Args>,
    {
        self.provides_with(Anchor::new(), f)
    }

    pub fn provides_with<F, Args>(self, anchor: Anchor, f: F) -> Self
    where
        F: ProviderMethod<H, Args>,
    {
        self.provider_binding(&PROVIDES, anchor, f)
    }

    pub fn creates<F, Args>(self, f: F) -> Self
    where
        F: ProviderMethod<H, Args>,
    {
        self.creates_with(Anchor::new(), f)
    }

    pub fn creates_with<F, Args>(self, anchor: Anchor, f: F) -> Self
    where
        F: ProviderMethod<H, Args>,
    {
        self.provider_binding(&CREATES, anchor, f)
    }

    pub fn maps<F, M, Args>(self, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.maps_with(Anchor::new(), f)
    }

    /// Maps `M` into the return type, or into a string format declared on
    /// the anchor.
    pub fn maps_with<F, M, Args>(mut self, anchor: Anchor, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        match maps_key::<M, F::Output>(&anchor) {
            Ok(key) => self.source_binding(&MAPS, anchor.key(key), f),
            Err(reason) => {
                self.errors.push(binding_error::<F>(reason));
                self
            }
        }
    }

    pub fn validates<F, M, Args>(self, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.validates_with(Anchor::new(), f)
    }

    pub fn validates_with<F, M, Args>(self, anchor: Anchor, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.source_binding(&VALIDATES, anchor, f)
    }

    pub fn authorizes<F, M, Args>(self, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.authorizes_with(Anchor::new(), f)
    }

    pub fn authorizes_with<F, M, Args>(self, anchor: Anchor, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        self.source_binding(&AUTHORIZES, anchor, f)
    }

    /// Adds a filter provider applied to every binding of the type.
    pub fn filter(mut self, provider: impl FilterProvider) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn filter_arc(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn source_binding<F, M, Args>(mut self, policy: &'static dyn Policy, anchor: Anchor, f: F) -> Self
    where
        F: SourceMethod<H, M, Args>,
        M: Send + Sync + 'static,
    {
        let callable = Callable {
            kind: BindingKind::Method,
            owner: Some(TypeKey::of::<H>()),
            name: type_name::<F>(),
            key: Key::of::<M>(),
            is_async: F::Output::is_async(),
            logical_output: logical_output::<F::Output>(),
            plan: F::plan(),
            invoker: f.into_invoker(anchor.strict),
        };
        self.push(policy, callable, anchor);
        self
    }

    fn provider_binding<F, Args>(mut self, policy: &'static dyn Policy, anchor: Anchor, f: F) -> Self
    where
        F: ProviderMethod<H, Args>,
    {
        let Some(key) = anchor
            .key
            .clone()
            .or_else(|| output_key::<F::Output>(anchor.strict))
        else {
            self.errors.push(binding_error::<F>(NO_OUTPUT_KEY));
            return self;
        };
        let callable = Callable {
            kind: BindingKind::Method,
            owner: Some(TypeKey::of::<H>()),
            name: type_name::<F>(),
            key,
            is_async: F::Output::is_async(),
            logical_output: logical_output::<F::Output>(),
            plan: F::plan(),
            invoker: f.into_invoker(anchor.strict),
        };
        self.push(policy, callable, anchor);
        self
    }

    fn push(&mut self, policy: &'static dyn Policy, callable: Callable, anchor: Anchor) {
        let binding = Binding::build(policy, callable, anchor);
        let duplicate = self.bindings.iter().any(|b| {
            b.policy().name() == policy.name() && b.key() == binding.key() && b.name() == binding.name()
        });
        if duplicate {
            self.errors.push(Error::MethodBinding {
                owner: type_name::<H>().to_string(),
                method: binding.name().to_string(),
                reason: format!("already bound under {} {}", policy.name(), binding.key()),
            });
            return;
        }
        self.bindings.push(binding);
    }
}

impl<H: Filter> HandlerType<H> {
    /// Runs every instance of `H` as a filter around its own bindings.
    pub fn filter_self(mut self) -> Self {
        let as_filter: ReceiverFilter = receiver_filter::<H>;
        self.receiver_filter = Some(as_filter);
        self
    }
}

fn receiver_filter<H: Filter>(receiver: &Payload) -> Option<Arc<dyn Filter>> {
    receiver.cast::<H>().map(|handler| handler as Arc<dyn Filter>)
}

impl<H: Send + Sync + 'static> Default for HandlerType<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn constructor_callable<H: 'static, F: 'static>(
    plan: crate::binding::ArgPlan,
    invoker: crate::binding::Invoker,
) -> Callable {
    Callable {
        kind: BindingKind::Constructor,
        owner: Some(TypeKey::of::<H>()),
        name: type_name::<F>(),
        key: Key::of::<H>(),
        is_async: false,
        logical_output: Some(TypeKey::of::<H>()),
        plan,
        invoker,
    }
}

fn source_fn<F, M, Args>(f: F, key: Key, strict: bool) -> Callable
where
    F: SourceFn<M, Args>,
{
    Callable {
        kind: BindingKind::Function,
        owner: None,
        name: type_name::<F>(),
        key,
        is_async: F::Output::is_async(),
        logical_output: logical_output::<F::Output>(),
        plan: F::plan(),
        invoker: f.into_invoker(strict),
    }
}

/// Covariant key of a return type: the element of a collection unless
/// strict, otherwise the output itself.
fn output_key<R: IntoReply>(strict: bool) -> Option<Key> {
    (!strict)
        .then(R::element_key)
        .flatten()
        .or_else(R::output_key)
        .map(Key::Type)
}

fn logical_output<R: IntoReply>() -> Option<TypeKey> {
    R::output_key().or_else(R::element_key)
}

fn maps_key<M: 'static, R: IntoReply>(anchor: &Anchor) -> Result<Key, &'static str> {
    let output = || output_key::<R>(anchor.strict).ok_or(NO_OUTPUT_KEY);
    match &anchor.format {
        Some(Format::To(format)) => Ok(Key::pair(Key::of::<M>(), Key::name(format.as_str()))),
        Some(Format::From(format)) => Ok(Key::pair(Key::name(format.as_str()), output()?)),
        None => Ok(Key::pair(Key::of::<M>(), output()?)),
    }
}

fn binding_error<F>(reason: &str) -> Error {
    Error::MethodBinding {
        owner: "function".to_string(),
        method: type_name::<F>().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ledger;

    struct Deposit(u32);

    impl Ledger {
        fn deposit(&self, deposit: &Deposit) -> u32 {
            deposit.0
        }

        fn balances(&self) -> Vec<u32> {
            vec![1, 2]
        }

        fn render(&self, deposit: &Deposit) -> String {
            deposit.0.to_string()
        }

        fn nothing(&self) {}
    }

    #[test]
    fn test_keys_follow_the_callable() {
        let spec: HandlerSpec = HandlerType::<Ledger>::new()
            .default_constructor()
            .handles(Ledger::deposit)
            .provides(Ledger::balances)
            .provides_with(Anchor::new().strict(), Ledger::balances)
            .maps_with(Anchor::new().format("text/plain"), Ledger::render)
            .into();
        assert!(spec.errors.is_empty());

        let keys: Vec<(&str, String)> = spec
            .bindings
            .iter()
            .map(|b| (b.policy().name(), b.key().to_string()))
            .collect();
        assert_eq!(keys[0], ("handles", "Deposit".to_string()));
        assert_eq!(keys[1], ("provides", "u32".to_string()));
        assert_eq!(keys[2].0, "provides");
        assert!(keys[2].1.ends_with("Vec<u32>"));
        assert_eq!(keys[3], ("maps", "(Deposit -> \"text/plain\")".to_string()));
        assert_eq!(keys[4], ("provides", "Ledger".to_string()));
        assert_eq!(keys[5], ("creates", "Ledger".to_string()));
        assert_eq!(spec.bindings[4].kind(), BindingKind::Constructor);
    }

    #[test]
    fn test_missing_output_key_is_a_binding_error() {
        let spec: HandlerSpec = HandlerType::<Ledger>::new().provides(Ledger::nothing).into();
        assert!(spec.bindings.is_empty());
        assert!(matches!(spec.errors[0], Error::MethodBinding { .. }));

        let spec: HandlerSpec = HandlerType::<Ledger>::new()
            .provides_with(Anchor::new().key("ledger.noop"), Ledger::nothing)
            .into();
        assert!(spec.errors.is_empty());
    }

    #[test]
    fn test_same_method_twice_is_rejected() {
        let spec: HandlerSpec = HandlerType::<Ledger>::new()
            .handles(Ledger::deposit)
            .handles(Ledger::deposit)
            .into();
        assert_eq!(spec.bindings.len(), 1);
        assert_eq!(spec.errors.len(), 1);
    }

    #[test]
    fn test_function_specs_are_keyed_by_the_function() {
        fn audit(deposit: &Deposit) -> bool {
            deposit.0 > 0
        }
        let spec = HandlerSpec::handles_fn(Anchor::new(), audit);
        assert_eq!(spec.owner(), None);
        assert_eq!(spec.bindings[0].key(), &Key::of::<Deposit>());
        assert_eq!(spec.id(), HandlerSpec::handles_fn(Anchor::new(), audit).id());
    }
}
