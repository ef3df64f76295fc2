//! Variance policies.
//!
//! A [`Policy`] decides which binding keys match a callback key, how
//! matching bindings are ordered and how the values a binding returns are
//! accepted. Every callback kind names one of the process-wide policies
//! declared here.

mod bindings;
mod variance;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding::Reply;
use crate::filter::FilterProvider;
use crate::foundation::Key;
use crate::handle_result::HandleResult;

pub use bindings::PolicyBindings;
pub use variance::{Bivariant, Contravariant, Covariant};

/// How a policy relates callback keys to binding keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    /// A binding accepts callbacks keyed by the binding key or a subtype.
    Contravariant,
    /// A binding satisfies callbacks keyed by its output or a supertype.
    Covariant,
    /// `(input, output)` pairs; input contravariant, output covariant.
    Bivariant,
}

/// Matching, ordering and acceptance rules shared by a callback kind.
pub trait Policy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn variance(&self) -> Variance;

    /// Strict policies never flatten collection results.
    fn is_strict(&self) -> bool {
        false
    }

    /// Returns `(variant, unknown)`: whether `key` takes part in variance
    /// and whether it is the catch-all key.
    fn variant_key(&self, key: &Key) -> (bool, bool) {
        match key {
            Key::Any => (true, true),
            Key::Type(_) | Key::Pair(..) => (true, false),
            Key::Name(_) => (false, false),
        }
    }

    /// Returns true if a binding keyed `binding_key` can handle a callback
    /// keyed `callback_key`. `invariant` demands an exact match.
    fn matches_key(&self, binding_key: &Key, callback_key: &Key, invariant: bool) -> bool;

    /// Returns true if `key` must be visited before `other`.
    fn less(&self, key: &Key, other: &Key) -> bool {
        if key == other || key.is_any() {
            return false;
        }
        other.is_any() || key.is_assignable_to(other)
    }

    /// Decides whether a binding's reply counts as handled.
    fn accept_results(&self, reply: &Reply) -> HandleResult;

    /// Filter providers applied to every binding of the policy.
    fn filters(&self) -> &PolicyFilters;
}

/// Filter providers registered on a policy.
pub struct PolicyFilters {
    providers: RwLock<Vec<Arc<dyn FilterProvider>>>,
}

impl PolicyFilters {
    pub const fn new() -> Self {
        Self {
            providers: parking_lot::const_rwlock(Vec::new()),
        }
    }

    pub fn add(&self, providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>) {
        let mut current = self.providers.write();
        for provider in providers {
            if !current.iter().any(|p| Arc::ptr_eq(p, &provider)) {
                current.push(provider);
            }
        }
    }

    pub fn remove(&self, provider: &Arc<dyn FilterProvider>) {
        self.providers.write().retain(|p| !Arc::ptr_eq(p, provider));
    }

    pub fn providers(&self) -> Vec<Arc<dyn FilterProvider>> {
        self.providers.read().clone()
    }
}

impl Default for PolicyFilters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicyFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyFilters")
            .field("providers", &self.providers.read().len())
            .finish()
    }
}

impl fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if both refer to the same policy.
pub fn same(a: &dyn Policy, b: &dyn Policy) -> bool {
    a.name() == b.name()
}

/// Commands and events.
pub static HANDLES: Contravariant = Contravariant::new("handles");

/// Dependency resolution.
pub static PROVIDES: Covariant = Covariant::new("provides");

/// Factories that always build a new value.
pub static CREATES: Covariant = Covariant::new("creates");

/// Transformations between a source and a target.
pub static MAPS: Bivariant = Bivariant::new("maps");

/// Structured validation.
pub static VALIDATES: Contravariant = Contravariant::new("validates");

/// Access checks.
pub static AUTHORIZES: Contravariant = Contravariant::new("authorizes");

/// Options lookups.
pub static OPTIONS: Contravariant = Contravariant::new("options");
