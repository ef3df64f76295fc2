//! Bindings: the addressable callables attached to a handler.
//!
//! A [`Binding`] is built once, when a handler type or function is
//! described, and is immutable afterwards. It records the key it answers
//! for under its policy, the declared constraints and filters, the plan
//! used to resolve its arguments and an invoker that calls the underlying
//! Rust function.

mod anchor;
mod args;
mod method;
mod reply;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::constraint::{Constraint, ConstraintProvider};
use crate::error::Result;
use crate::filter::FilterProvider;
use crate::foundation::{Key, TypeKey};
use crate::handle_context::HandleContext;
use crate::policy::Policy;

pub use anchor::Anchor;
pub(crate) use anchor::Format;
pub use args::{
    All, Arg, ArgKind, ArgPlan, ArgSpec, Dep, FromDispatch, KeyName, Keyed, Named, Source,
};
pub use method::{Constructor, ProviderFn, ProviderMethod, SourceFn, SourceMethod, TryConstructor};
pub use reply::{IntoReply, Output, Reply};

/// Calls the Rust function behind a binding.
pub type Invoker = Arc<dyn Fn(&HandleContext) -> Result<Output> + Send + Sync>;

/// Shape of the callable behind a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// A method on a handler instance.
    Method,
    /// A free function.
    Function,
    /// Builds the handler itself.
    Constructor,
    /// Forwards to the bindings of another handler type.
    Intercept,
}

/// A single callable registered under a policy and key.
pub struct Binding {
    pub(crate) key: Key,
    pub(crate) policy: &'static dyn Policy,
    pub(crate) kind: BindingKind,
    pub(crate) owner: Option<TypeKey>,
    pub(crate) name: String,
    pub(crate) strict: bool,
    pub(crate) skip_filters: bool,
    pub(crate) is_async: bool,
    pub(crate) logical_output: Option<TypeKey>,
    pub(crate) constraints: Vec<Arc<dyn Constraint>>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) providers: Vec<Arc<dyn FilterProvider>>,
    pub(crate) plan: ArgPlan,
    pub(crate) invoker: Invoker,
}

/// Everything a binding needs besides its anchor.
#[derive(Clone)]
pub(crate) struct Callable {
    pub kind: BindingKind,
    pub owner: Option<TypeKey>,
    pub name: &'static str,
    pub key: Key,
    pub is_async: bool,
    pub logical_output: Option<TypeKey>,
    pub plan: ArgPlan,
    pub invoker: Invoker,
}

impl Binding {
    /// Builds a binding from a callable and the anchor it was declared with.
    pub(crate) fn build(policy: &'static dyn Policy, callable: Callable, anchor: Anchor) -> Self {
        let mut providers = anchor.providers;
        providers.push(Arc::new(ConstraintProvider));
        Self {
            key: anchor.key.unwrap_or(callable.key),
            policy,
            kind: callable.kind,
            owner: callable.owner,
            name: callable.name.to_string(),
            strict: anchor.strict,
            skip_filters: anchor.skip_filters,
            is_async: callable.is_async,
            logical_output: callable.logical_output,
            constraints: anchor.constraints,
            tags: anchor.tags,
            providers,
            plan: callable.plan,
            invoker: callable.invoker,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn policy(&self) -> &'static dyn Policy {
        self.policy
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// The handler type declaring this binding, if any.
    pub fn owner(&self) -> Option<TypeKey> {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn skip_filters(&self) -> bool {
        self.skip_filters
    }

    /// True when the callable returns a deferred value.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// The produced type with any deferred wrapper removed.
    pub fn logical_output(&self) -> Option<TypeKey> {
        self.logical_output
    }

    pub fn constraints(&self) -> &[Arc<dyn Constraint>] {
        &self.constraints
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.providers
    }

    pub fn plan(&self) -> &ArgPlan {
        &self.plan
    }

    pub fn invoke(&self, ctx: &HandleContext) -> Result<Output> {
        (self.invoker)(ctx)
    }

    /// Copy of this binding that forwards to `invoker` and runs no filters.
    pub(crate) fn intercept(&self, invoker: Invoker) -> Self {
        Self {
            key: self.key.clone(),
            policy: self.policy,
            kind: BindingKind::Intercept,
            owner: self.owner,
            name: self.name.clone(),
            strict: self.strict,
            skip_filters: true,
            is_async: self.is_async,
            logical_output: self.logical_output,
            constraints: Vec::new(),
            tags: self.tags.clone(),
            providers: Vec::new(),
            plan: ArgPlan::default(),
            invoker,
        }
    }

    #[cfg(test)]
    pub(crate) fn stub(policy: &'static dyn Policy, key: Key) -> Self {
        Self::build(
            policy,
            Callable {
                kind: BindingKind::Function,
                owner: None,
                name: "stub",
                key,
                is_async: false,
                logical_output: None,
                plan: ArgPlan::default(),
                invoker: Arc::new(|_| Ok(Output::Ready(Reply::none()))),
            },
            Anchor::new(),
        )
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("policy", &self.policy.name())
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.policy.name(), self.key, self.name)
    }
}
