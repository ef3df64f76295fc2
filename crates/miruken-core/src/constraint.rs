//! Binding constraints.
//!
//! A callback may *require* constraints (a name, metadata, a qualifier) and a
//! binding may *declare* them. The [`ConstraintProvider`] filter, attached to
//! every binding, aborts a dispatch whose required constraints are not
//! satisfied by the binding's declared ones.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::{Binding, Output};
use crate::callback::Callback;
use crate::error::Result;
use crate::filter::{Filter, FilterProvider, Next, stage};
use crate::foundation::TypeKey;
use crate::handle_context::HandleContext;
use crate::handler::BoxHandler;
use crate::provides::{Provides, Resolves};

/// A declarative predicate on callback metadata.
pub trait Constraint: Send + Sync + fmt::Debug + 'static {
    /// A required constraint must be matched even if the callback did not
    /// ask for it.
    fn required(&self) -> bool {
        false
    }

    /// An implied constraint can satisfy itself without a matching callback
    /// constraint.
    fn implied(&self) -> bool {
        false
    }

    /// Returns true if this declared constraint satisfies `required`, or,
    /// when `required` is `None`, if it holds on its own for `callback`.
    fn satisfies(&self, required: Option<&dyn Constraint>, callback: &dyn Callback) -> bool;

    fn as_any(&self) -> &dyn Any;
}

// ─── Named ──────────────────────────────────────────────────────────────────

/// Matches bindings registered under a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named(pub String);

impl Named {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Constraint for Named {
    fn satisfies(&self, required: Option<&dyn Constraint>, _callback: &dyn Callback) -> bool {
        required
            .and_then(|r| r.as_any().downcast_ref::<Named>())
            .is_some_and(|r| r == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Metadata ───────────────────────────────────────────────────────────────

/// Key/value metadata that must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, Option<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `k=v,k2=v2`, where a bare `k` has no value.
    pub fn parse(spec: &str) -> Self {
        let entries = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (entry.to_string(), None),
            })
            .collect();
        Self(entries)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Constraint for Metadata {
    fn satisfies(&self, required: Option<&dyn Constraint>, _callback: &dyn Callback) -> bool {
        required
            .and_then(|r| r.as_any().downcast_ref::<Metadata>())
            .is_some_and(|r| r == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Qualifier ──────────────────────────────────────────────────────────────

/// A marker type used as a constraint.
pub struct Qualifier<T>(PhantomData<fn() -> T>);

impl<T> Qualifier<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Qualifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Qualifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Qualifier<{}>", std::any::type_name::<T>())
    }
}

impl<T: 'static> Constraint for Qualifier<T> {
    fn satisfies(&self, required: Option<&dyn Constraint>, _callback: &dyn Callback) -> bool {
        required.is_some_and(|r| r.as_any().is::<Qualifier<T>>())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── For ────────────────────────────────────────────────────────────────────

/// Restricts a provider to dependencies resolved on behalf of `T`.
///
/// The constraint walks the parent chain of the requesting
/// [`Provides`] and matches when any binding being invoked there produces
/// a `T`.
pub struct For<T>(PhantomData<fn() -> T>);

impl<T> For<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for For<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for For<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "For<{}>", std::any::type_name::<T>())
    }
}

impl<T: 'static> Constraint for For<T> {
    fn required(&self) -> bool {
        true
    }

    fn implied(&self) -> bool {
        true
    }

    fn satisfies(&self, required: Option<&dyn Constraint>, callback: &dyn Callback) -> bool {
        if required.is_some() {
            return false;
        }
        let any = callback.as_any();
        let Some(provides) = any
            .downcast_ref::<Provides>()
            .or_else(|| any.downcast_ref::<Resolves>().map(Resolves::provides))
        else {
            return true;
        };
        let target = TypeKey::of::<T>();
        let mut parent = provides.parent().cloned();
        while let Some(p) = parent {
            if p
                .binding()
                .and_then(|b| b.logical_output())
                .is_some_and(|output| output.is_assignable_to(&target))
            {
                return true;
            }
            parent = p.parent().cloned();
        }
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Constraint filter
// ============================================================================

/// Checks `declared` binding constraints against the constraints `required`
/// by `callback`.
pub fn satisfied(
    declared: &[Arc<dyn Constraint>],
    required: &[Arc<dyn Constraint>],
    callback: &dyn Callback,
) -> bool {
    let holds_alone = |c: &Arc<dyn Constraint>| c.implied() && c.satisfies(None, callback);
    if required.is_empty() {
        return declared
            .iter()
            .filter(|c| c.required())
            .all(holds_alone);
    }
    let mut matched = vec![false; declared.len()];
    for r in required {
        let Some(pos) = declared
            .iter()
            .position(|c| c.satisfies(Some(r.as_ref()), callback))
        else {
            return false;
        };
        matched[pos] = true;
    }
    declared
        .iter()
        .zip(matched)
        .filter(|(c, matched)| c.required() && !matched)
        .all(|(c, _)| holds_alone(c))
}

struct ConstraintFilter;

impl Filter for ConstraintFilter {
    fn order(&self) -> i32 {
        stage::FILTER
    }

    fn next(
        &self,
        next: Next,
        ctx: &HandleContext,
        _provider: &Arc<dyn FilterProvider>,
    ) -> Result<Output> {
        let declared = ctx.binding().constraints();
        let callback = ctx.callback();
        let required = callback.constraints();
        if (declared.is_empty() && required.is_empty())
            || satisfied(declared, required, &**callback)
        {
            next.pipe()
        } else {
            next.abort()
        }
    }
}

/// Required filter provider enforcing binding constraints.
#[derive(Debug, Default)]
pub struct ConstraintProvider;

impl FilterProvider for ConstraintProvider {
    fn required(&self) -> bool {
        true
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(ConstraintFilter)])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
