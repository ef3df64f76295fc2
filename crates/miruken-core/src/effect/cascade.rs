//! Cascading messages as an effect.

use std::sync::Arc;

use tracing::trace;

use crate::callback::Resolution;
use crate::constraint::Constraint;
use crate::error::Result;
use crate::foundation::{Deferred, Payload};
use crate::handle_context::HandleContext;
use crate::handler::BoxHandler;
use crate::handles::Handles;

use super::Effect;

/// Dispatches further messages once a reply is accepted.
///
/// Messages are sent through the composer of the dispatch that produced
/// the reply unless another handler is given. A message nobody handles
/// fails the original dispatch.
#[derive(Clone, Default)]
pub struct Cascade {
    messages: Vec<Payload>,
    constraints: Vec<Arc<dyn Constraint>>,
    handler: Option<BoxHandler>,
    greedy: bool,
}

/// Cascades `messages` as commands.
pub fn handle(messages: impl IntoIterator<Item = Payload>) -> Cascade {
    Cascade {
        messages: messages.into_iter().collect(),
        ..Cascade::default()
    }
}

impl Cascade {
    /// Offers every message to all handlers.
    pub fn greedy(mut self) -> Self {
        self.greedy = true;
        self
    }

    pub fn constraints(mut self, constraints: impl IntoIterator<Item = Arc<dyn Constraint>>) -> Self {
        self.constraints = constraints.into_iter().collect();
        self
    }

    /// Sends through `handler` instead of the composer.
    pub fn handler(mut self, handler: BoxHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn messages(&self) -> &[Payload] {
        &self.messages
    }
}

impl Effect for Cascade {
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>> {
        let handler = self.handler.as_ref().unwrap_or(ctx.composer());
        let mut pending = Vec::new();
        for message in &self.messages {
            trace!(key = %message.key(), greedy = self.greedy, "cascading");
            let callback =
                Arc::new(Handles::from_payload(message.clone()).with_constraints(self.constraints.clone()));
            if let Resolution::Pending(deferred) = callback.execute(handler, self.greedy)? {
                pending.push(deferred.then(|_| ()));
            }
        }
        Ok(match pending.len() {
            0 => None,
            1 => pending.pop(),
            _ => Some(Deferred::all(pending).then(|_| ())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Reply;
    use crate::descriptor::{Describe, DescriptorFactory, HandlerType};
    use crate::error::Error;
    use crate::handler::{Handlers, Instance};
    use parking_lot::Mutex;

    struct PlaceOrder(u32);
    struct ReserveStock(u32);
    struct Orphan;

    #[derive(Default)]
    struct Orders {
        log: Mutex<Vec<String>>,
    }

    impl Orders {
        fn place(&self, order: &PlaceOrder) -> Reply {
            self.log.lock().push(format!("placed {}", order.0));
            Reply::value(order.0).effect(handle([Payload::new(ReserveStock(order.0))]))
        }

        fn orphan(&self, _: &Orphan) -> Reply {
            Reply::none().effect(handle([Payload::new(42_i64)]))
        }
    }

    impl Describe for Orders {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Orders::place).handles(Orders::orphan)
        }
    }

    #[derive(Default)]
    struct Stock {
        reserved: Mutex<Vec<u32>>,
    }

    impl Stock {
        fn reserve(&self, reserve: &ReserveStock) {
            self.reserved.lock().push(reserve.0);
        }
    }

    impl Describe for Stock {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Stock::reserve)
        }
    }

    fn setup() -> (Arc<Orders>, Arc<Stock>, BoxHandler) {
        let factory = DescriptorFactory::new();
        let orders = Arc::new(Orders::default());
        let stock = Arc::new(Stock::default());
        let handler: BoxHandler = Arc::new(Handlers::new([
            Arc::new(Instance::with_factory(&factory, orders.clone()).unwrap()) as BoxHandler,
            Arc::new(Instance::with_factory(&factory, stock.clone()).unwrap()),
        ]));
        (orders, stock, handler)
    }

    #[test]
    fn test_cascade_reaches_other_handlers_through_the_composer() {
        let (orders, stock, handler) = setup();
        Arc::new(Handles::new(PlaceOrder(3))).execute(&handler, false).unwrap();
        assert_eq!(orders.log.lock().as_slice(), ["placed 3"]);
        assert_eq!(stock.reserved.lock().as_slice(), [3]);
    }

    #[test]
    fn test_unhandled_cascade_fails_the_dispatch() {
        let (_, _, handler) = setup();
        let err = Arc::new(Handles::new(Orphan)).execute(&handler, false).unwrap_err();
        assert!(matches!(err, Error::NotHandled { .. }));
    }
}
