//! Sending messages.
//!
//! Each operation places a fresh, non-root [`Stash`] in front of the
//! handler, so anything stashed while the message is handled is gone once
//! it completes.
//!
//! | operation   | receivers | response      |
//! |-------------|-----------|---------------|
//! | [`send`]    | first     | `Arc<T>`      |
//! | [`post`]    | first     | none          |
//! | [`publish`] | all       | none          |

use std::sync::Arc;

use miruken_core::{
    BoxHandler, Context, Deferred, HandlerExt, Handles, Payload, Result, WithHandler,
};
use tracing::debug;

use crate::stash::Stash;

fn stashed(handler: &impl HandlerExt) -> BoxHandler {
    Arc::new(WithHandler::new(handler.handler(), Arc::new(Stash::new(false))))
}

/// Sends `message` and waits for a response of type `T`.
///
/// Fails with `NotHandled` when no handler accepts the message or none
/// responds with a `T`.
pub fn send<T, M>(handler: &impl HandlerExt, message: M) -> Result<Deferred<Arc<T>>>
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    Ok(stashed(handler).execute::<T, M>(message)?.into_deferred())
}

/// Sends an already erased message and returns its first response, if any.
pub fn send_payload(handler: &impl HandlerExt, message: Payload) -> Result<Deferred<Option<Payload>>> {
    Ok(Arc::new(Handles::from_payload(message))
        .execute(&stashed(handler), false)?
        .map(|responses| responses.into_iter().next())
        .into_deferred())
}

/// Sends `message` without expecting a response.
pub fn post<M: Send + Sync + 'static>(handler: &impl HandlerExt, message: M) -> Result<Deferred<()>> {
    Ok(stashed(handler).command(message)?.into_deferred())
}

/// Posts an already erased message.
pub fn post_payload(handler: &impl HandlerExt, message: Payload) -> Result<Deferred<()>> {
    Ok(Arc::new(Handles::from_payload(message))
        .execute(&stashed(handler), false)?
        .map(|_| ())
        .into_deferred())
}

/// Sends `message` to every handler that accepts it.
///
/// A message nobody accepts is not an error.
pub fn publish<M: Send + Sync + 'static>(handler: &impl HandlerExt, message: M) -> Result<Deferred<()>> {
    publish_payload(handler, Payload::new(message))
}

/// Publishes an already erased message.
pub fn publish_payload(handler: &impl HandlerExt, message: Payload) -> Result<Deferred<()>> {
    let key = message.key();
    match Arc::new(Handles::from_payload(message)).execute(&stashed(handler), true) {
        Ok(handled) => Ok(handled.map(|_| ()).into_deferred()),
        Err(err) if err.is_not_handled() => {
            debug!(key = %key, "published message had no receivers");
            Ok(Deferred::resolved(()))
        }
        Err(err) => Err(err),
    }
}

/// Publishes `message` to `context` and every context below it.
pub fn notify<M: Send + Sync + 'static>(context: &Context, message: M) -> Result<Deferred<()>> {
    publish(&context.publish_handler(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stash::{stash_get, stash_put};
    use miruken_core::prelude::*;
    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Quote {
        symbol: String,
        value: f64,
    }

    impl IntoReply for Quote {}

    struct GetQuote(&'static str);
    struct Trade(&'static str);

    #[derive(Default)]
    struct Desk {
        trades: Mutex<Vec<String>>,
    }

    impl Desk {
        fn quote(&self, get: &GetQuote, composer: BoxHandler) -> Result<Quote> {
            stash_put(&composer, get.0.to_string())?;
            let stashed = stash_get::<String>(&composer)?.map(|s| s.to_string());
            Ok(Quote {
                symbol: stashed.unwrap_or_default(),
                value: 10.0,
            })
        }

        fn trade(&self, trade: &Trade) {
            self.trades.lock().push(format!("desk {}", trade.0));
        }
    }

    impl Describe for Desk {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Desk::quote).handles(Desk::trade)
        }
    }

    #[derive(Default)]
    struct Audit {
        trades: Mutex<Vec<String>>,
    }

    impl Audit {
        fn trade(&self, trade: &Trade) {
            self.trades.lock().push(format!("audit {}", trade.0));
        }
    }

    impl Describe for Audit {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Audit::trade)
        }
    }

    fn handlers() -> (Arc<Desk>, Arc<Audit>, BoxHandler) {
        let desk = Arc::new(Desk::default());
        let audit = Arc::new(Audit::default());
        let handler: BoxHandler = Arc::new(miruken_core::Handlers::new([
            Instance::shared(desk.clone()).unwrap().boxed(),
            Instance::shared(audit.clone()).unwrap().boxed(),
        ]));
        (desk, audit, handler)
    }

    #[tokio::test]
    async fn test_send_uses_a_fresh_stash() {
        let (_, _, handler) = handlers();
        let quote = send::<Quote, _>(&handler, GetQuote("MSFT")).unwrap().await.unwrap();
        assert_eq!(quote.symbol, "MSFT");
        assert!(quote.value > 0.0);
    }

    #[tokio::test]
    async fn test_send_without_receiver_is_not_handled() {
        let (_, _, handler) = handlers();
        assert!(send::<Quote, _>(&handler, 42_u8).unwrap_err().is_not_handled());
    }

    #[tokio::test]
    async fn test_post_reaches_first_receiver() {
        let (desk, audit, handler) = handlers();
        post(&handler, Trade("IBM")).unwrap().await.unwrap();
        assert_eq!(*desk.trades.lock(), vec!["desk IBM"]);
        assert!(audit.trades.lock().is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_receiver() {
        let (desk, audit, handler) = handlers();
        publish(&handler, Trade("IBM")).unwrap().await.unwrap();
        assert_eq!(*desk.trades.lock(), vec!["desk IBM"]);
        assert_eq!(*audit.trades.lock(), vec!["audit IBM"]);
    }

    #[tokio::test]
    async fn test_publish_without_receiver_succeeds() {
        let (_, _, handler) = handlers();
        publish(&handler, 7_i64).unwrap().await.unwrap();
        assert!(post(&handler, 7_i64).unwrap_err().is_not_handled());
    }

    #[tokio::test]
    async fn test_notify_reaches_child_contexts() {
        let root = Context::new();
        let child = root.new_child();
        let audit = Arc::new(Audit::default());
        child.add_handlers([Instance::shared(audit.clone()).unwrap().boxed()]);
        notify(&root, Trade("SAP")).unwrap().await.unwrap();
        assert_eq!(*audit.trades.lock(), vec!["audit SAP"]);
    }
}
