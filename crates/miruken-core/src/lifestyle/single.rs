use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::binding::{Binding, Output};
use crate::callback::Callback;
use crate::error::Result;
use crate::filter::{Filter, FilterProvider, Next, stage};
use crate::handle_context::HandleContext;
use crate::handler::BoxHandler;

type Slot = Arc<Mutex<Option<Output>>>;

/// One value for the lifetime of the binding.
///
/// The first successful call is cached and every later request receives
/// the same reply. A failed call leaves nothing behind, so the next request
/// tries again.
#[derive(Clone, Default)]
pub struct Single {
    slot: Slot,
}

impl Single {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilterProvider for Single {
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
        Ok(vec![Arc::new(SingleFilter {
            slot: self.slot.clone(),
        })])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SingleFilter {
    slot: Slot,
}

impl Filter for SingleFilter {
    fn order(&self) -> i32 {
        stage::LIFESTYLE
    }

    fn next(&self, next: Next, _ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        if let Some(output) = self.slot.lock().as_ref() {
            return Ok(output.clone());
        }
        let output = next.pipe()?;
        if !super::cacheable(&output) {
            return Ok(output);
        }
        let output = match output {
            Output::Pending(pending) => {
                let reset = self.slot.clone();
                Output::Pending(pending.catch(move |err| {
                    reset.lock().take();
                    Err(err)
                }))
            }
            ready => ready,
        };
        // A concurrent first call may have won the race.
        let mut slot = self.slot.lock();
        Ok(slot.get_or_insert(output).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Anchor, IntoReply};
    use crate::descriptor::{Describe, DescriptorFactory, HandlerType};
    use crate::foundation::Payload;
    use crate::handler::Instance;
    use crate::provides::Provides;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Registry;

    struct Clock;

    impl IntoReply for Clock {}

    struct Calendar;

    impl IntoReply for Calendar {}

    struct Almanac;

    impl Almanac {
        fn calendar(&self) -> Calendar {
            thread::yield_now();
            Calendar
        }
    }

    impl Describe for Almanac {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.provides_with(Anchor::new().single(), Almanac::calendar)
        }
    }

    fn resolve<T: 'static>(handler: &BoxHandler) -> Payload {
        Arc::new(Provides::of::<T>().build())
            .resolve(handler)
            .unwrap()
            .ready()
            .flatten()
            .unwrap()
    }

    impl Registry {
        fn clock(&self) -> Clock {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Clock
        }
    }

    impl Describe for Registry {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.provides_with(Anchor::new().single(), Registry::clock)
        }
    }

    #[test]
    fn test_single_returns_the_same_instance() {
        let factory = DescriptorFactory::new();
        let handler: BoxHandler = Arc::new(Instance::with_factory(&factory, Arc::new(Registry)).unwrap());
        let first = resolve::<Clock>(&handler);
        let second = resolve::<Clock>(&handler);
        assert!(first.ptr_eq(&second));
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_resolution_shares_one_instance() {
        let factory = DescriptorFactory::new();
        let handler: BoxHandler = Arc::new(Instance::with_factory(&factory, Arc::new(Almanac)).unwrap());
        let barrier = Barrier::new(8);
        let resolved: Vec<Payload> = thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        resolve::<Calendar>(&handler)
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(resolved.iter().all(|payload| payload.ptr_eq(&resolved[0])));
        assert!(resolve::<Calendar>(&handler).ptr_eq(&resolved[0]));
    }
}
