//! Lifestyles: filters that cache what provider bindings return.
//!
//! Lifestyle providers are required, so they keep caching even when a
//! dispatch suppresses filters, and they only apply to `provides`
//! requests; `creates` always builds a new value.

mod scoped;
mod single;

use crate::binding::Output;
use crate::callback::Callback;
use crate::policy::{PROVIDES, same};

pub use scoped::{Disposable, Scoped};
pub use single::Single;

fn applies_to(callback: &dyn Callback) -> bool {
    same(callback.policy(), &PROVIDES)
}

/// Outputs worth caching: ready replies with values, or pending replies
/// that have not failed yet.
fn cacheable(output: &Output) -> bool {
    match output {
        Output::Ready(reply) => !reply.values().is_empty(),
        Output::Pending(pending) => !matches!(pending.peek(), Some(Err(_))),
    }
}
