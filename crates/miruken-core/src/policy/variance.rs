use crate::binding::Reply;
use crate::foundation::Key;
use crate::handle_result::HandleResult;

use super::{Policy, PolicyFilters, Variance};

// ─── Contravariant ──────────────────────────────────────────────────────────

/// Policy for callbacks that carry an input, such as commands.
#[derive(Debug)]
pub struct Contravariant {
    name: &'static str,
    filters: PolicyFilters,
}

impl Contravariant {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            filters: PolicyFilters::new(),
        }
    }
}

impl Policy for Contravariant {
    fn name(&self) -> &'static str {
        self.name
    }

    fn filters(&self) -> &PolicyFilters {
        &self.filters
    }

    fn variance(&self) -> Variance {
        Variance::Contravariant
    }

    fn matches_key(&self, binding_key: &Key, callback_key: &Key, invariant: bool) -> bool {
        binding_key == callback_key || (!invariant && callback_key.is_assignable_to(binding_key))
    }

    fn accept_results(&self, reply: &Reply) -> HandleResult {
        reply.result().cloned().unwrap_or(HandleResult::HANDLED)
    }
}

// ─── Covariant ──────────────────────────────────────────────────────────────

/// Policy for callbacks that ask for an output, such as dependencies.
#[derive(Debug)]
pub struct Covariant {
    name: &'static str,
    filters: PolicyFilters,
}

impl Covariant {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            filters: PolicyFilters::new(),
        }
    }
}

impl Policy for Covariant {
    fn name(&self) -> &'static str {
        self.name
    }

    fn filters(&self) -> &PolicyFilters {
        &self.filters
    }

    fn variance(&self) -> Variance {
        Variance::Covariant
    }

    fn matches_key(&self, binding_key: &Key, callback_key: &Key, invariant: bool) -> bool {
        binding_key == callback_key
            || (!invariant && (binding_key.is_any() || binding_key.is_assignable_to(callback_key)))
    }

    /// Supertypes come first so a walk starting at the requested key still
    /// reaches every subtype that can satisfy it.
    fn less(&self, key: &Key, other: &Key) -> bool {
        if key == other || key.is_any() {
            return false;
        }
        other.is_any() || other.is_assignable_to(key)
    }

    fn accept_results(&self, reply: &Reply) -> HandleResult {
        accept_outputs(reply)
    }
}

// ─── Bivariant ──────────────────────────────────────────────────────────────

/// Policy for `(input, output)` transformations.
#[derive(Debug)]
pub struct Bivariant {
    name: &'static str,
    filters: PolicyFilters,
}

impl Bivariant {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            filters: PolicyFilters::new(),
        }
    }
}

impl Policy for Bivariant {
    fn name(&self) -> &'static str {
        self.name
    }

    fn filters(&self) -> &PolicyFilters {
        &self.filters
    }

    fn variance(&self) -> Variance {
        Variance::Bivariant
    }

    fn matches_key(&self, binding_key: &Key, callback_key: &Key, invariant: bool) -> bool {
        if binding_key == callback_key {
            return true;
        }
        if invariant {
            return false;
        }
        match (binding_key.as_pair(), callback_key.as_pair()) {
            (Some((b_in, b_out)), Some((c_in, c_out))) => {
                c_in.is_assignable_to(b_in) && (b_out.is_any() || b_out.is_assignable_to(c_out))
            }
            _ => binding_key.is_any(),
        }
    }

    fn less(&self, key: &Key, other: &Key) -> bool {
        match (key.as_pair(), other.as_pair()) {
            (Some((k_in, k_out)), Some((o_in, o_out))) => {
                if k_in == o_in {
                    k_out != o_out && !k_out.is_any() && (o_out.is_any() || k_out.is_assignable_to(o_out))
                } else {
                    !k_in.is_any() && (o_in.is_any() || k_in.is_assignable_to(o_in))
                }
            }
            _ => key != other && !key.is_any() && other.is_any(),
        }
    }

    fn accept_results(&self, reply: &Reply) -> HandleResult {
        accept_outputs(reply)
    }
}

/// An explicit result wins; otherwise at least one value is required.
fn accept_outputs(reply: &Reply) -> HandleResult {
    match (reply.values().is_empty(), reply.result()) {
        (_, Some(result)) => result.clone(),
        (true, None) => HandleResult::NOT_HANDLED,
        (false, None) => HandleResult::HANDLED,
    }
}
