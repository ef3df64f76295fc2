//! Scheduling batches of requests.
//!
//! A [`ConcurrentBatch`] dispatches every request and reports each outcome
//! in request order. A [`SequentialBatch`] dispatches one request at a time
//! and stops at the first failure, which is the last response reported.
//! Both complete with a [`ScheduledResult`] produced by the [`Scheduler`].

use std::sync::Arc;

use miruken_core::{
    BoxHandler, Deferred, Describe, Error, HandlerExt, HandlerType, IntoReply, Payload, Result,
};
use tracing::debug;

use crate::either::Either;
use crate::message::{publish_payload, send, send_payload};

/// Outcome of one scheduled request.
pub type Response = Either<Error, Payload>;

/// Requests processed concurrently.
#[derive(Clone, Debug, Default)]
pub struct ConcurrentBatch {
    pub requests: Vec<Payload>,
}

impl ConcurrentBatch {
    pub fn new(requests: impl IntoIterator<Item = Payload>) -> Self {
        Self {
            requests: requests.into_iter().collect(),
        }
    }

    pub fn request<M: Send + Sync + 'static>(mut self, request: M) -> Self {
        self.requests.push(Payload::new(request));
        self
    }
}

/// Requests processed one after another until one fails.
#[derive(Clone, Debug, Default)]
pub struct SequentialBatch {
    pub requests: Vec<Payload>,
}

impl SequentialBatch {
    pub fn new(requests: impl IntoIterator<Item = Payload>) -> Self {
        Self {
            requests: requests.into_iter().collect(),
        }
    }

    pub fn request<M: Send + Sync + 'static>(mut self, request: M) -> Self {
        self.requests.push(Payload::new(request));
        self
    }
}

/// A message to publish to every receiver.
#[derive(Clone, Debug)]
pub struct Published {
    pub message: Payload,
}

impl Published {
    pub fn new<M: Send + Sync + 'static>(message: M) -> Self {
        Self {
            message: Payload::new(message),
        }
    }
}

/// Responses of a scheduled batch, in request order.
///
/// A request without a response reports a unit payload.
#[derive(Clone, Debug, Default)]
pub struct ScheduledResult {
    pub responses: Vec<Response>,
}

impl IntoReply for ScheduledResult {}

// ============================================================================
// Scheduler
// ============================================================================

/// Handles the batch messages.
#[derive(Debug, Default)]
pub struct Scheduler;

impl Scheduler {
    fn concurrent(&self, batch: &ConcurrentBatch, composer: BoxHandler) -> Deferred<ScheduledResult> {
        debug!(requests = batch.requests.len(), "scheduling concurrent batch");
        let responses = batch
            .requests
            .iter()
            .map(|request| process(&composer, request.clone()));
        Deferred::all(responses).then(|responses| ScheduledResult { responses })
    }

    fn sequential(&self, batch: &SequentialBatch, composer: BoxHandler) -> Deferred<ScheduledResult> {
        debug!(requests = batch.requests.len(), "scheduling sequential batch");
        let requests = batch.requests.clone();
        Deferred::from_future(async move {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                let response = process(&composer, request).await?;
                let failed = response.is_left();
                responses.push(response);
                if failed {
                    break;
                }
            }
            Ok(ScheduledResult { responses })
        })
    }

    fn publish(&self, published: &Published, composer: BoxHandler) -> Result<Deferred<()>> {
        publish_payload(&composer, published.message.clone())
    }
}

impl Describe for Scheduler {
    fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
        handler
            .default_constructor()
            .handles(Scheduler::concurrent)
            .handles(Scheduler::sequential)
            .handles(Scheduler::publish)
    }
}

/// Sends one request; the result never rejects.
fn process(composer: &BoxHandler, request: Payload) -> Deferred<Response> {
    match send_payload(composer, request) {
        Ok(response) => response
            .then(|value| Either::Right(value.unwrap_or_else(|| Payload::new(()))))
            .catch(|err| Ok(Either::Left(err))),
        Err(err) => Deferred::resolved(Either::Left(err)),
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Processes `requests` one at a time, stopping at the first failure.
pub fn sequential(
    handler: &impl HandlerExt,
    requests: impl IntoIterator<Item = Payload>,
) -> Result<Deferred<Vec<Response>>> {
    schedule(handler, SequentialBatch::new(requests))
}

/// Processes `requests` concurrently.
pub fn concurrent(
    handler: &impl HandlerExt,
    requests: impl IntoIterator<Item = Payload>,
) -> Result<Deferred<Vec<Response>>> {
    schedule(handler, ConcurrentBatch::new(requests))
}

fn schedule<B: Send + Sync + 'static>(handler: &impl HandlerExt, batch: B) -> Result<Deferred<Vec<Response>>> {
    Ok(send::<ScheduledResult, B>(handler, batch)?.then(|result: Arc<ScheduledResult>| result.responses.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::post;
    use miruken_core::Handlers;
    use miruken_core::prelude::*;
    use parking_lot::Mutex;

    #[derive(Clone, Debug)]
    struct StockQuote {
        symbol: String,
    }

    impl IntoReply for StockQuote {}

    struct GetStockQuote(&'static str);
    struct SellStock(&'static str);

    #[derive(Default)]
    struct StockQuotes {
        sold: Mutex<Vec<String>>,
    }

    impl StockQuotes {
        fn quote(&self, get: &GetStockQuote) -> Deferred<StockQuote> {
            match get.0 {
                "EX" => Deferred::rejected(Error::custom("stock exchange is down")),
                symbol => Deferred::resolved(StockQuote {
                    symbol: symbol.to_string(),
                }),
            }
        }

        fn sell(&self, sell: &SellStock) -> Result<()> {
            if sell.0 == "EX" {
                return Err(Error::custom("stock exchange is down"));
            }
            self.sold.lock().push(sell.0.to_string());
            Ok(())
        }
    }

    impl Describe for StockQuotes {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(StockQuotes::quote).handles(StockQuotes::sell)
        }
    }

    fn setup() -> (Arc<StockQuotes>, BoxHandler) {
        let quotes = Arc::new(StockQuotes::default());
        let handler: BoxHandler = Arc::new(Handlers::new([
            Instance::of(Scheduler).unwrap().boxed(),
            Instance::shared(quotes.clone()).unwrap().boxed(),
        ]));
        (quotes, handler)
    }

    fn symbols(responses: &[Response]) -> Vec<String> {
        responses
            .iter()
            .cloned()
            .map(|response| {
                response.fold(
                    |err| err.to_string(),
                    |quote| match quote.downcast_ref::<StockQuote>() {
                        Some(quote) => quote.symbol.clone(),
                        None => "done".to_string(),
                    },
                )
            })
            .collect()
    }

    fn quotes(symbols: &[&'static str]) -> Vec<Payload> {
        symbols.iter().map(|&s| Payload::new(GetStockQuote(s))).collect()
    }

    #[tokio::test]
    async fn test_sequential_success() {
        let (_, handler) = setup();
        let batch = SequentialBatch::default()
            .request(GetStockQuote("APPL"))
            .request(GetStockQuote("MSFT"))
            .request(GetStockQuote("GOOGL"));
        let result = send::<ScheduledResult, _>(&handler, batch).unwrap().await.unwrap();
        assert_eq!(symbols(&result.responses), vec!["APPL", "MSFT", "GOOGL"]);
        assert!(result.responses.iter().all(Either::is_right));
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let (_, handler) = setup();
        let responses = sequential(&handler, quotes(&["APPL", "EX", "EX"]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(symbols(&responses), vec!["APPL", "stock exchange is down"]);
    }

    #[tokio::test]
    async fn test_concurrent_keeps_request_order() {
        let (_, handler) = setup();
        let responses = concurrent(&handler, quotes(&["APPL", "MSFT", "GOOGL"]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(symbols(&responses), vec!["APPL", "MSFT", "GOOGL"]);
    }

    #[tokio::test]
    async fn test_concurrent_reports_every_failure() {
        let (_, handler) = setup();
        let responses = concurrent(&handler, quotes(&["APPL", "EX", "EX"]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            symbols(&responses),
            vec!["APPL", "stock exchange is down", "stock exchange is down"]
        );
    }

    #[tokio::test]
    async fn test_commands_report_unit_responses() {
        let (quotes, handler) = setup();
        let responses = concurrent(
            &handler,
            [Payload::new(SellStock("IBM")), Payload::new(SellStock("EX"))],
        )
        .unwrap()
        .await
        .unwrap();
        assert_eq!(symbols(&responses), vec!["done", "stock exchange is down"]);
        assert!(responses[0].as_ref().into_right().is_some_and(|p| p.is::<()>()));
        assert_eq!(*quotes.sold.lock(), vec!["IBM"]);
    }

    #[tokio::test]
    async fn test_unhandled_request_is_a_failure() {
        let (_, handler) = setup();
        let responses = concurrent(&handler, [Payload::new(3_u16)]).unwrap().await.unwrap();
        assert!(responses[0].as_ref().into_left().is_some_and(Error::is_not_handled));
    }

    #[tokio::test]
    async fn test_published_messages_need_no_receiver() {
        let (quotes, handler) = setup();
        post(&handler, Published::new(SellStock("SAP"))).unwrap().await.unwrap();
        post(&handler, Published::new(9_u64)).unwrap().await.unwrap();
        assert_eq!(*quotes.sold.lock(), vec!["SAP"]);
    }
}
