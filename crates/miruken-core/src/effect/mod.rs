//! Effects: extra work a binding asks for alongside its return value.
//!
//! An effect is attached to a [`Reply`](crate::binding::Reply) and applied
//! right after the reply is accepted, with the same handle context as the
//! binding. An effect that returns a deferred value delays the callback's
//! results until it completes; an effect error fails the dispatch.
//!
//! ```rust,ignore
//! fn place(&self, order: &PlaceOrder) -> Reply {
//!     Reply::value(OrderPlaced::from(order))
//!         .effect(cascade::handle([Payload::new(ReserveStock::from(order))]))
//! }
//! ```

pub mod cascade;

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::foundation::Deferred;
use crate::handle_context::HandleContext;

/// Work applied after a binding's reply is accepted.
pub trait Effect: Send + Sync + 'static {
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>>;
}

// ─── Group ──────────────────────────────────────────────────────────────────

/// Applies effects in order and waits for all of them.
pub struct Group {
    effects: Vec<Arc<dyn Effect>>,
}

impl Effect for Group {
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>> {
        let mut pending = Vec::new();
        for effect in &self.effects {
            if let Some(deferred) = effect.apply(ctx)? {
                pending.push(deferred);
            }
        }
        Ok(match pending.len() {
            0 => None,
            1 => pending.pop(),
            _ => Some(Deferred::all(pending).then(|_| ())),
        })
    }
}

/// Combines `effects` into one.
pub fn group(effects: impl IntoIterator<Item = Arc<dyn Effect>>) -> Group {
    Group {
        effects: effects.into_iter().collect(),
    }
}

// ─── Spawned ────────────────────────────────────────────────────────────────

/// An effect run as a future.
pub struct Spawned<F> {
    f: F,
}

impl<F, Fut> Effect for Spawned<F>
where
    F: Fn(HandleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>> {
        let fut = (self.f)(ctx.clone());
        // Without a runtime the future runs when the callback results are awaited.
        let deferred = match tokio::runtime::Handle::try_current() {
            Ok(_) => Deferred::spawn(fut),
            Err(_) => Deferred::from_future(fut),
        };
        Ok(Some(deferred))
    }
}

/// Turns an async closure into an effect.
pub fn spawned<F, Fut>(f: F) -> Spawned<F>
where
    F: Fn(HandleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Spawned { f }
}

// ─── FromFn ─────────────────────────────────────────────────────────────────

/// A synchronous effect backed by a closure.
pub struct FromFn<F>(F);

impl<F> Effect for FromFn<F>
where
    F: Fn(&HandleContext) -> Result<()> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>> {
        (self.0)(ctx).map(|()| None)
    }
}

pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(&HandleContext) -> Result<()> + Send + Sync + 'static,
{
    FromFn(f)
}
