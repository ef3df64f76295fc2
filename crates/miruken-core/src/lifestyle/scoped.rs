use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::binding::{Binding, Output};
use crate::callback::Callback;
use crate::context::{Context, ContextObserver, EndReason};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterProvider, Next, stage};
use crate::foundation::Payload;
use crate::handle_context::HandleContext;
use crate::handler::BoxHandler;
use crate::provides::{Provides, provides_of};

use super::Single;

/// Values released when the context caching them ends.
pub trait Disposable: Send + Sync + 'static {
    fn dispose(&self);
}

type Cache = Arc<Mutex<HashMap<usize, Output>>>;
type Disposer = Arc<dyn Fn(&Payload) + Send + Sync>;

/// One value per context.
///
/// The value is cached for the context found through the composer, or for
/// the root of that context when rooted. Ending the context evicts the
/// value and disposes it when a disposer was declared with
/// [`dispose`](Scoped::dispose).
#[derive(Clone, Default)]
pub struct Scoped {
    rooted: bool,
    cache: Cache,
    disposer: Option<Disposer>,
}

impl Scoped {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches for the root context instead of the current one.
    pub fn rooted() -> Self {
        Self {
            rooted: true,
            ..Self::default()
        }
    }

    /// Disposes cached values of type `T` when their context ends.
    pub fn dispose<T: Disposable>(mut self) -> Self {
        self.disposer = Some(Arc::new(|payload: &Payload| {
            if let Some(value) = payload.cast::<T>() {
                value.dispose();
            }
        }));
        self
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }
}

impl fmt::Debug for Scoped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("rooted", &self.rooted)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl FilterProvider for Scoped {
    fn required(&self) -> bool {
        true
    }

    fn applies_to(&self, callback: &dyn Callback) -> bool {
        super::applies_to(callback)
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(ScopedFilter {
            scoped: self.clone(),
        })])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ScopedFilter {
    scoped: Scoped,
}

impl ScopedFilter {
    fn context(&self, ctx: &HandleContext) -> Result<Context> {
        let context = Arc::new(Provides::of::<Context>().build())
            .resolve(ctx.composer())?
            .ready()
            .flatten()
            .and_then(|payload| payload.downcast_ref::<Context>().cloned())
            .ok_or_else(|| Error::custom("scoped lifestyle requires a context"))?;
        let context = if self.scoped.rooted { context.root() } else { context };
        if !context.is_active() {
            return Err(Error::ContextEnded);
        }
        Ok(context)
    }

    /// A scoped value must not be captured by a single further up.
    fn check_parent(&self, ctx: &HandleContext) -> Result<()> {
        let mut parent = provides_of(ctx.callback()).and_then(|p| p.parent().cloned());
        while let Some(provides) = parent {
            let single = provides
                .binding()
                .is_some_and(|b| b.filters().iter().any(|p| p.as_any().is::<Single>()));
            if single {
                return Err(Error::custom(format!(
                    "{} is scoped and cannot be injected into a single",
                    ctx.binding()
                )));
            }
            parent = provides.parent().cloned();
        }
        Ok(())
    }
}

impl Filter for ScopedFilter {
    fn order(&self) -> i32 {
        stage::LIFESTYLE
    }

    fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        self.check_parent(ctx)?;
        let context = self.context(ctx)?;
        if let Some(output) = self.scoped.cache.lock().get(&context.id()) {
            return Ok(output.clone());
        }
        let output = next.pipe()?;
        if !super::cacheable(&output) {
            return Ok(output);
        }
        let output = {
            let mut cache = self.scoped.cache.lock();
            if let Some(existing) = cache.get(&context.id()) {
                return Ok(existing.clone());
            }
            cache.insert(context.id(), output.clone());
            output
        };
        trace!(context = context.id(), binding = %ctx.binding(), "scoped value cached");
        let _ = context.observe(Arc::new(Evict {
            cache: self.scoped.cache.clone(),
            disposer: self.scoped.disposer.clone(),
        }));
        Ok(output)
    }
}

/// Evicts the value of an ending context.
struct Evict {
    cache: Cache,
    disposer: Option<Disposer>,
}

impl ContextObserver for Evict {
    fn context_ended(&self, context: &Context, _reason: &EndReason) {
        let Some(output) = self.cache.lock().remove(&context.id()) else {
            return;
        };
        let Some(disposer) = &self.disposer else {
            return;
        };
        let values = match output {
            Output::Ready(reply) => reply.values().to_vec(),
            Output::Pending(pending) => match pending.peek() {
                Some(Ok(reply)) => reply.values().to_vec(),
                _ => Vec::new(),
            },
        };
        for value in &values {
            disposer(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Anchor, IntoReply};
    use crate::descriptor::{Describe, DescriptorFactory, HandlerType};
    use crate::handler::Instance;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DISPOSED: AtomicUsize = AtomicUsize::new(0);

    struct Sessions;

    struct Session;

    impl IntoReply for Session {}

    impl Disposable for Session {
        fn dispose(&self) {
            DISPOSED.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Sessions {
        fn session(&self) -> Session {
            Session
        }
    }

    impl Describe for Sessions {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.provides_with(
                Anchor::new().filter(Scoped::new().dispose::<Session>()),
                Sessions::session,
            )
        }
    }

    fn resolve(context: &Context) -> Payload {
        Arc::new(Provides::of::<Session>().build())
            .resolve(&context.boxed())
            .unwrap()
            .ready()
            .flatten()
            .unwrap()
    }

    #[test]
    fn test_one_value_per_context_disposed_once() {
        let factory = DescriptorFactory::new();
        let root = Context::new();
        root.add_handlers([
            Arc::new(Instance::with_factory(&factory, Arc::new(Sessions)).unwrap()) as BoxHandler,
        ]);
        let first = root.new_child();
        let second = root.new_child();

        let a = resolve(&first);
        assert!(a.ptr_eq(&resolve(&first)));
        let b = resolve(&second);
        assert!(!a.ptr_eq(&b));

        first.end(EndReason::Ended);
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
        first.end(EndReason::Ended);
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);

        root.end(EndReason::Ended);
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 2);
        root.end(EndReason::Ended);
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 2);
    }
}
