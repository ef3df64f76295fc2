//! Argument resolvers.
//!
//! Every parameter after the receiver and callback source is resolved by a
//! [`FromDispatch`] implementation. Resolution may complete immediately or
//! return a pending future; the binding waits for all pending arguments
//! before calling the method.
//!
//! # Example
//!
//! ```rust,ignore
//! impl OrderHandler {
//!     fn place(
//!         &self,
//!         order: &PlaceOrder,
//!         pricing: Dep<PricingService>,
//!         audit: Option<Named<AuditLog, Primary>>,
//!         ctx: HandleContext,
//!     ) -> Result<Receipt> { ... }
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::callback::{Callback, CallbackRef, Resolution, downcast_arc};
use crate::constraint::Named as NamedConstraint;
use crate::error::{Error, Result};
use crate::foundation::{Deferred, Key, Payload};
use crate::handle_context::HandleContext;
use crate::handler::BoxHandler;
use crate::provides::{Provides, provides_of};

// ============================================================================
// Arg
// ============================================================================

/// A resolved argument, possibly still pending.
pub enum Arg<T> {
    Ready(T),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T: Send + 'static> Arg<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Arg::Pending(_))
    }

    /// The value of a ready argument.
    pub fn into_value(self) -> Result<T> {
        match self {
            Arg::Ready(value) => Ok(value),
            Arg::Pending(_) => Err(Error::custom("argument is still pending")),
        }
    }

    /// Waits for the argument.
    pub async fn resolve(self) -> Result<T> {
        match self {
            Arg::Ready(value) => Ok(value),
            Arg::Pending(pending) => pending.await,
        }
    }

    pub fn map<U, F>(self, f: F) -> Arg<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Arg::Ready(value) => Arg::Ready(f(value)),
            Arg::Pending(pending) => Arg::Pending(pending.map(|r| r.map(f)).boxed()),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Which resolver supplies a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Context,
    Composer,
    Callback,
    Source,
    Dependency,
    All,
    Named,
    Keyed,
    Options,
    Deferred,
    Configuration,
    Custom,
}

/// Build-time description of one parameter.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub type_name: &'static str,
    pub kind: ArgKind,
    pub optional: bool,
}

impl ArgSpec {
    pub fn new<T: ?Sized>(kind: ArgKind) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            kind,
            optional: false,
        }
    }
}

/// Parameters of a binding in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ArgPlan {
    args: Vec<ArgSpec>,
}

impl ArgPlan {
    pub fn new(args: Vec<ArgSpec>) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Resolves a parameter from the current dispatch.
pub trait FromDispatch: Sized + Send + 'static {
    fn spec() -> ArgSpec;

    /// Resolves the parameter at `index`.
    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>>;
}

/// Error for a parameter that cannot be supplied.
pub fn unresolved<T: ?Sized>(index: usize, reason: impl Into<String>) -> Error {
    Error::UnresolvedArg {
        index,
        type_name: std::any::type_name::<T>(),
        reason: reason.into(),
    }
}

// ============================================================================
// Context resolvers
// ============================================================================

impl FromDispatch for HandleContext {
    fn spec() -> ArgSpec {
        ArgSpec::new::<Self>(ArgKind::Context)
    }

    fn from_dispatch(ctx: &HandleContext, _index: usize) -> Result<Arg<Self>> {
        Ok(Arg::Ready(ctx.clone()))
    }
}

impl FromDispatch for BoxHandler {
    fn spec() -> ArgSpec {
        ArgSpec::new::<Self>(ArgKind::Composer)
    }

    fn from_dispatch(ctx: &HandleContext, _index: usize) -> Result<Arg<Self>> {
        Ok(Arg::Ready(ctx.composer().clone()))
    }
}

impl FromDispatch for CallbackRef {
    fn spec() -> ArgSpec {
        ArgSpec::new::<Self>(ArgKind::Callback)
    }

    fn from_dispatch(ctx: &HandleContext, _index: usize) -> Result<Arg<Self>> {
        Ok(Arg::Ready(ctx.callback().clone()))
    }
}

/// The concrete callback being dispatched.
impl<C: Callback> FromDispatch for Arc<C> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<C>(ArgKind::Callback)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        downcast_arc::<C>(ctx.callback())
            .map(Arg::Ready)
            .ok_or_else(|| unresolved::<C>(index, "callback has a different type"))
    }
}

/// The value carried by the callback.
pub struct Source<T>(pub Arc<T>);

impl<T: Send + Sync + 'static> FromDispatch for Source<T> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Source)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        ctx.callback()
            .source()
            .and_then(|source| source.cast::<T>())
            .map(|value| Arg::Ready(Source(value)))
            .ok_or_else(|| unresolved::<T>(index, "callback source is not assignable"))
    }
}

// ============================================================================
// Dependency resolvers
// ============================================================================

fn parent_of(ctx: &HandleContext) -> Option<Arc<Provides>> {
    provides_of(ctx.callback())
}

fn resolve_one<T: Send + Sync + 'static>(
    ctx: &HandleContext,
    provides: Provides,
    index: usize,
) -> Result<Arg<Arc<T>>> {
    let cast = move |payload: Option<Payload>| {
        payload
            .and_then(|p| p.cast::<T>())
            .ok_or_else(|| unresolved::<T>(index, "no provider"))
    };
    match Arc::new(provides).resolve(ctx.composer())? {
        Resolution::Ready(payload) => cast(payload).map(Arg::Ready),
        Resolution::Pending(pending) => Ok(Arg::Pending(
            async move { cast(pending.await?) }.boxed(),
        )),
    }
}

/// A dependency resolved through the composer.
///
/// The nested resolution records the current one as its parent so
/// [`For`](crate::constraint::For) constraints can see who is asking.
pub struct Dep<T>(pub Arc<T>);

impl<T> Clone for Dep<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Send + Sync + 'static> FromDispatch for Dep<T> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Dependency)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        let provides = Provides::builder(Key::of::<T>())
            .parent(parent_of(ctx))
            .build();
        Ok(resolve_one::<T>(ctx, provides, index)?.map(Dep))
    }
}

/// Every available instance of `T`.
pub struct All<T>(pub Vec<Arc<T>>);

impl<T> Clone for All<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Send + Sync + 'static> FromDispatch for All<T> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::All)
    }

    fn from_dispatch(ctx: &HandleContext, _index: usize) -> Result<Arg<Self>> {
        let provides = Provides::builder(Key::of::<T>())
            .parent(parent_of(ctx))
            .many(true)
            .build();
        let cast = |payloads: Vec<Payload>| All(payloads.iter().filter_map(Payload::cast::<T>).collect());
        match Arc::new(provides).resolve_all(ctx.composer())? {
            Resolution::Ready(payloads) => Ok(Arg::Ready(cast(payloads))),
            Resolution::Pending(pending) => Ok(Arg::Pending(
                async move { pending.await.map(cast) }.boxed(),
            )),
        }
    }
}

/// A static string used as a key or name in a parameter type.
///
/// ```rust,ignore
/// struct Primary;
/// impl KeyName for Primary { const NAME: &'static str = "primary"; }
/// ```
pub trait KeyName: Send + Sync + 'static {
    const NAME: &'static str;
}

/// A dependency registered under the name `N`.
pub struct Named<T, N: KeyName>(pub Arc<T>, PhantomData<fn() -> N>);

impl<T, N: KeyName> Clone for Named<T, N> {
    fn clone(&self) -> Self {
        Self(self.0.clone(), PhantomData)
    }
}

impl<T: Send + Sync + 'static, N: KeyName> FromDispatch for Named<T, N> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Named)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        let provides = Provides::builder(Key::of::<T>())
            .parent(parent_of(ctx))
            .constraint(NamedConstraint::new(N::NAME))
            .build();
        Ok(resolve_one::<T>(ctx, provides, index)?.map(|value| Named(value, PhantomData)))
    }
}

/// A dependency provided under the string key `K`.
pub struct Keyed<T, K: KeyName>(pub Arc<T>, PhantomData<fn() -> K>);

impl<T, K: KeyName> Clone for Keyed<T, K> {
    fn clone(&self) -> Self {
        Self(self.0.clone(), PhantomData)
    }
}

impl<T: Send + Sync + 'static, K: KeyName> FromDispatch for Keyed<T, K> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Keyed)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        let provides = Provides::builder(Key::name(K::NAME))
            .parent(parent_of(ctx))
            .build();
        Ok(resolve_one::<T>(ctx, provides, index)?.map(|value| Keyed(value, PhantomData)))
    }
}

impl<T> Deref for Source<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Deref for Dep<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Deref for All<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &[Arc<T>] {
        &self.0
    }
}

impl<T, N: KeyName> Deref for Named<T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T, K: KeyName> Deref for Keyed<T, K> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Dep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dep<{}>", std::any::type_name::<T>())
    }
}

// ============================================================================
// Lifting resolvers
// ============================================================================

/// Optional parameters resolve to `None` instead of failing.
impl<A: FromDispatch> FromDispatch for Option<A> {
    fn spec() -> ArgSpec {
        ArgSpec {
            optional: true,
            ..A::spec()
        }
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        match A::from_dispatch(ctx, index) {
            Ok(Arg::Ready(value)) => Ok(Arg::Ready(Some(value))),
            Ok(Arg::Pending(pending)) => Ok(Arg::Pending(
                async move {
                    match pending.await {
                        Ok(value) => Ok(Some(value)),
                        Err(err) if err.is_unresolved_arg() => Ok(None),
                        Err(err) => Err(err),
                    }
                }
                .boxed(),
            )),
            Err(err) if err.is_unresolved_arg() => Ok(Arg::Ready(None)),
            Err(err) => Err(err),
        }
    }
}

/// Deferred parameters receive the pending value without waiting for it.
impl<A> FromDispatch for Deferred<A>
where
    A: FromDispatch + Clone + Sync,
{
    fn spec() -> ArgSpec {
        ArgSpec {
            kind: ArgKind::Deferred,
            ..A::spec()
        }
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> Result<Arg<Self>> {
        Ok(Arg::Ready(match A::from_dispatch(ctx, index)? {
            Arg::Ready(value) => Deferred::resolved(value),
            Arg::Pending(pending) => Deferred::from_future(pending),
        }))
    }
}
