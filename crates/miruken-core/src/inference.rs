//! Inference: reaching handlers that are described but not in the chain.
//!
//! The [`Inference`] handler mirrors every descriptor in a
//! [`DescriptorFactory`]. Constructors and free functions are invoked
//! directly. Method bindings are replaced by forwarding bindings that
//! resolve an instance of the owning type (usually through its
//! constructor) and hand it the original callback.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::binding::{Binding, BindingKind, Invoker, Output, Reply};
use crate::callback::{Callback, CallbackGuard, CallbackRef, DispatchGuard, Resolution};
use crate::descriptor::{DescriptorFactory, HandlerDescriptor};
use crate::foundation::{Key, Payload, TypeKey};
use crate::handle_context::HandleContext;
use crate::handle_result::HandleResult;
use crate::handler::{BoxHandler, Handler, dispatch};
use crate::provides::{Resolves, provides_of};

type Snapshot = (usize, Arc<Vec<HandlerDescriptor>>);

/// Dispatches callbacks to everything a factory has described.
pub struct Inference {
    factory: DescriptorFactory,
    snapshot: RwLock<Option<Snapshot>>,
}

impl Inference {
    pub fn new(factory: DescriptorFactory) -> Self {
        Self {
            factory,
            snapshot: RwLock::new(None),
        }
    }

    /// Inference over the process-wide factory.
    pub fn global() -> Self {
        Self::new(DescriptorFactory::global().clone())
    }

    pub fn factory(&self) -> &DescriptorFactory {
        &self.factory
    }

    /// The mirrored descriptors, rebuilt when the factory has grown.
    fn descriptors(&self) -> Arc<Vec<HandlerDescriptor>> {
        let len = self.factory.len();
        if let Some((built, descriptors)) = self.snapshot.read().as_ref()
            && *built == len
        {
            return descriptors.clone();
        }
        let mut sources = self.factory.descriptors();
        sources.sort_by_key(|d| d.id().name());
        let descriptors: Arc<Vec<HandlerDescriptor>> = Arc::new(
            sources
                .iter()
                .map(|descriptor| self.mirror(descriptor))
                .collect(),
        );
        trace!(descriptors = descriptors.len(), "inference rebuilt");
        *self.snapshot.write() = Some((len, descriptors.clone()));
        descriptors
    }

    fn mirror(&self, descriptor: &HandlerDescriptor) -> HandlerDescriptor {
        let bindings = descriptor.policies().flat_map(|bindings| bindings.iter()).map(|binding| {
            match (binding.kind(), binding.owner()) {
                (BindingKind::Method, Some(owner)) => {
                    Arc::new(binding.intercept(forward(owner, self.factory.clone())))
                }
                _ => binding.clone(),
            }
        });
        HandlerDescriptor::new(
            descriptor.id(),
            descriptor.owner(),
            bindings.collect::<Vec<_>>(),
            descriptor.providers().to_vec(),
        )
    }
}

impl Handler for Inference {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        if !callback.can_infer() {
            return HandleResult::NOT_HANDLED;
        }
        let owners = OwnerGuard::default();
        let mut result = HandleResult::NOT_HANDLED;
        for descriptor in self.descriptors().iter() {
            result = result.or(descriptor.dispatch(None, callback, greedy, composer, Some(&owners)));
            if result.should_stop(greedy) {
                break;
            }
        }
        result
    }
}

/// Resolves instances of `owner` and dispatches the current callback to
/// them.
fn forward(owner: TypeKey, factory: DescriptorFactory) -> Invoker {
    Arc::new(move |ctx: &HandleContext| {
        let resolves = Arc::new(Resolves::new(
            Key::Type(owner),
            ctx.callback().clone(),
            ctx.greedy(),
            provides_of(ctx.callback()),
            factory.clone(),
        ));
        let callback: CallbackRef = resolves.clone();
        if let Some(err) = dispatch(ctx.composer(), &callback, ctx.greedy()).into_error() {
            return Err(err);
        }
        match resolves.base().results() {
            Resolution::Pending(pending) => Ok(Output::Pending(pending.then(|_| Reply::none()))),
            Resolution::Ready(_) => Ok(Output::Ready(Reply::from_result(HandleResult::from_handled(
                resolves.succeeded(),
            )))),
        }
    })
}

/// Lets each owner be resolved once per dispatch, however many of its
/// bindings match.
#[derive(Default)]
struct OwnerGuard {
    owners: Mutex<HashSet<TypeKey>>,
}

impl CallbackGuard for OwnerGuard {
    fn can_dispatch(&self, _receiver: Option<&Payload>, binding: &Arc<Binding>) -> Option<DispatchGuard> {
        match (binding.kind(), binding.owner()) {
            (BindingKind::Intercept, Some(owner)) if !self.owners.lock().insert(owner) => None,
            _ => Some(DispatchGuard::approved()),
        }
    }
}
