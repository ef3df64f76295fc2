//! Posting or publishing follow-up messages once a reply is accepted.
//!
//! ```rust,ignore
//! fn place(&self, order: &PlaceOrder) -> Reply {
//!     Reply::value(order.id).effect(cascade::publish([Payload::new(OrderPlaced(order.id))]))
//! }
//! ```

use miruken_core::{BoxHandler, Deferred, Effect, HandleContext, Payload, Result};
use tracing::trace;

use crate::message::{post_payload, publish_payload};

/// Messages sent after the reply that carries them is accepted.
///
/// Posted messages must have a receiver. Published messages need none.
#[derive(Clone, Default)]
pub struct Messages {
    messages: Vec<Payload>,
    handler: Option<BoxHandler>,
    publish: bool,
}

/// Posts each of `messages`.
pub fn post(messages: impl IntoIterator<Item = Payload>) -> Messages {
    Messages {
        messages: messages.into_iter().collect(),
        ..Messages::default()
    }
}

/// Publishes each of `messages`.
pub fn publish(messages: impl IntoIterator<Item = Payload>) -> Messages {
    Messages {
        publish: true,
        ..post(messages)
    }
}

impl Messages {
    /// Sends through `handler` instead of the composer.
    pub fn handler(mut self, handler: BoxHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn messages(&self) -> &[Payload] {
        &self.messages
    }

    pub fn is_publish(&self) -> bool {
        self.publish
    }
}

impl Effect for Messages {
    fn apply(&self, ctx: &HandleContext) -> Result<Option<Deferred<()>>> {
        let handler = self.handler.as_ref().unwrap_or(ctx.composer());
        let mut pending = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            trace!(key = %message.key(), publish = self.publish, "sending follow-up message");
            let sent = if self.publish {
                publish_payload(handler, message.clone())?
            } else {
                post_payload(handler, message.clone())?
            };
            pending.push(sent);
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
    use crate::message::send;
    use miruken_core::binding::Reply;
    use miruken_core::prelude::*;
    use parking_lot::Mutex;

    struct PlaceOrder(u32);
    struct ReserveStock(u32);
    struct OrderPlaced(u32);
    struct CancelOrder(u32);

    #[derive(Default)]
    struct Orders;

    impl Orders {
        fn place(&self, order: &PlaceOrder) -> Reply {
            Reply::value(order.0)
                .effect(post([Payload::new(ReserveStock(order.0))]))
                .effect(publish([Payload::new(OrderPlaced(order.0)), Payload::new("unheard")]))
        }

        fn cancel(&self, cancel: &CancelOrder) -> Reply {
            Reply::value(cancel.0).effect(post([Payload::new(42_i64)]))
        }
    }

    impl Describe for Orders {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Orders::place).handles(Orders::cancel)
        }
    }

    #[derive(Default)]
    struct Stock {
        log: Mutex<Vec<String>>,
    }

    impl Stock {
        fn reserve(&self, reserve: &ReserveStock) {
            self.log.lock().push(format!("reserved {}", reserve.0));
        }

        fn placed(&self, placed: &OrderPlaced) {
            self.log.lock().push(format!("placed {}", placed.0));
        }
    }

    impl Describe for Stock {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Stock::reserve).handles(Stock::placed)
        }
    }

    fn setup() -> (Arc<Stock>, BoxHandler) {
        let stock = Arc::new(Stock::default());
        let handler: BoxHandler = Arc::new(miruken_core::Handlers::new([
            Instance::of(Orders).unwrap().boxed(),
            Instance::shared(stock.clone()).unwrap().boxed(),
        ]));
        (stock, handler)
    }

    #[tokio::test]
    async fn test_posts_follow_up_messages() {
        let (stock, handler) = setup();
        let id = send::<u32, _>(&handler, PlaceOrder(5)).unwrap().await.unwrap();
        assert_eq!(*id, 5);
        assert_eq!(*stock.log.lock(), vec!["reserved 5", "placed 5"]);
    }

    #[test]
    fn test_posted_message_without_receiver_fails() {
        let (_, handler) = setup();
        let err = send::<u32, _>(&handler, CancelOrder(1)).unwrap_err();
        assert!(err.is_not_handled());
    }

    #[test]
    fn test_publish_needs_no_receiver() {
        let messages = publish([Payload::new(7_u8)]);
        assert!(messages.is_publish());
        assert_eq!(messages.messages().len(), 1);
    }
}
