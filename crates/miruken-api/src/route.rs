//! Routing messages to named destinations.
//!
//! [`route_to`] wraps a message in a [`Routed`] envelope. Handlers accept
//! routed messages for a set of schemes with the [`Routes`] filter, which
//! refuses any other scheme so an unknown route surfaces as `NotHandled`.
//!
//! Inside a batch the filter hands routed messages to the [`RouteBatcher`]
//! instead. When the batch completes, each route receives a single
//! [`ConcurrentBatch`] and the responses are matched back to the pending
//! requests in order.
//!
//! ```rust,ignore
//! impl Describe for Relay {
//!     fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
//!         handler.handles_with(Anchor::new().routes(["relay"]), Relay::forward)
//!     }
//! }
//!
//! let quote = send::<Quote, _>(&handler, route_to(GetQuote::new("MSFT"), "relay")?)?.await?;
//! ```

use std::any::Any;
use std::mem;
use std::sync::Arc;

use miruken_core::batch::get_batch;
use miruken_core::binding::{Binding, Output, Reply};
use miruken_core::filter::stage;
use miruken_core::{
    Anchor, Batching, BoxHandler, Callback, CallbackRef, Deferred, Describe, Filter,
    FilterProvider, HandleContext, HandleResult, Handler, HandlerType, Next, Payload,
    Resolver, Result, TypeKey,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::either::Either;
use crate::error::{ApiError, ApiResult};
use crate::message::send_payload;
use crate::schedule::{ConcurrentBatch, Response, ScheduledResult};

/// Scheme served by [`PassThroughRouter`].
pub const PASS_THROUGH: &str = "pass-through";

// ============================================================================
// Routed
// ============================================================================

/// A message addressed to a route.
#[derive(Clone, Debug)]
pub struct Routed {
    message: Payload,
    route: String,
}

impl Routed {
    pub fn message(&self) -> &Payload {
        &self.message
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// The part of the route before `:`, or the whole route.
    pub fn scheme(&self) -> &str {
        self.route
            .split_once(':')
            .map_or(self.route.as_str(), |(scheme, _)| scheme)
    }
}

/// Addresses `message` to `route`.
pub fn route_to<M: Send + Sync + 'static>(message: M, route: impl Into<String>) -> ApiResult<Routed> {
    route_payload(Payload::new(message), route)
}

pub fn route_payload(message: Payload, route: impl Into<String>) -> ApiResult<Routed> {
    let route = route.into();
    if route.trim().is_empty() {
        return Err(ApiError::EmptyRoute);
    }
    Ok(Routed { message, route })
}

// ============================================================================
// Routes
// ============================================================================

/// Restricts a binding to routed messages with one of its schemes.
#[derive(Clone, Debug)]
pub struct Routes {
    schemes: Vec<String>,
}

impl Routes {
    pub fn new(schemes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            schemes: schemes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    pub fn accepts(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }
}

impl FilterProvider for Routes {
    fn required(&self) -> bool {
        true
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(self.clone())])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Filter for Routes {
    fn order(&self) -> i32 {
        stage::FILTER
    }

    fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        let Ok(routed) = ctx.source_as::<Routed>() else {
            return next.abort();
        };
        if !self.accepts(routed.scheme()) {
            trace!(route = routed.route(), schemes = ?self.schemes, "route refused");
            return next.abort();
        }
        if let Some(batcher) = get_batch::<RouteBatcher>(ctx.composer(), Some(TypeKey::of::<Routes>())) {
            return Ok(Output::Pending(batcher.enqueue(&routed)));
        }
        next.pipe()
    }
}

/// Declares route schemes on an [`Anchor`].
pub trait RoutesAnchor {
    fn routes(self, schemes: impl IntoIterator<Item = impl Into<String>>) -> Anchor;
}

impl RoutesAnchor for Anchor {
    fn routes(self, schemes: impl IntoIterator<Item = impl Into<String>>) -> Anchor {
        self.filter(Routes::new(schemes))
    }
}

// ============================================================================
// PassThroughRouter
// ============================================================================

/// Handles the `pass-through` route by sending the message locally.
#[derive(Debug, Default)]
pub struct PassThroughRouter;

impl PassThroughRouter {
    fn pass_through(&self, routed: &Routed, composer: BoxHandler) -> Result<Deferred<Option<Payload>>> {
        send_payload(&composer, routed.message().clone())
    }
}

impl Describe for PassThroughRouter {
    fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
        handler
            .default_constructor()
            .handles_with(Anchor::new().routes([PASS_THROUGH]), PassThroughRouter::pass_through)
    }
}

// ============================================================================
// RouteBatcher
// ============================================================================

/// Responses a route returned for a batch.
#[derive(Clone, Debug)]
pub struct RouteReply {
    pub uri: String,
    pub responses: Vec<Response>,
}

struct Pending {
    message: Payload,
    resolver: Resolver<Reply>,
}

struct RouteGroup {
    route: String,
    pending: Vec<Pending>,
}

/// Collects routed messages while a batch is open, grouped by route in
/// arrival order.
#[derive(Default)]
pub struct RouteBatcher {
    groups: Mutex<Vec<RouteGroup>>,
}

impl RouteBatcher {
    fn enqueue(&self, routed: &Routed) -> Deferred<Reply> {
        let mut slot = None;
        let reply = Deferred::new(|resolver| slot = Some(resolver));
        let Some(resolver) = slot else {
            return reply;
        };
        let pending = Pending {
            message: routed.message().clone(),
            resolver,
        };
        let mut groups = self.groups.lock();
        match groups.iter_mut().find(|group| group.route == routed.route()) {
            Some(group) => group.pending.push(pending),
            None => groups.push(RouteGroup {
                route: routed.route().to_string(),
                pending: vec![pending],
            }),
        }
        reply
    }

    pub fn len(&self) -> usize {
        self.groups.lock().iter().map(|group| group.pending.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Handler for RouteBatcher {
    fn handle(&self, _callback: &CallbackRef, _greedy: bool, _composer: &BoxHandler) -> HandleResult {
        HandleResult::NOT_HANDLED
    }
}

impl Batching for RouteBatcher {
    fn complete(&self, composer: &BoxHandler) -> Result<Deferred<Payload>> {
        let groups = mem::take(&mut *self.groups.lock());
        let replies: Vec<_> = groups.into_iter().map(|group| group.dispatch(composer)).collect();
        Ok(Deferred::all(replies).then(Payload::new))
    }
}

impl RouteGroup {
    fn dispatch(self, composer: &BoxHandler) -> Deferred<RouteReply> {
        let RouteGroup { route, pending } = self;
        debug!(route = %route, requests = pending.len(), "sending routed batch");
        let batch = ConcurrentBatch::new(pending.iter().map(|p| p.message.clone()));
        let sent = Routed {
            message: Payload::new(batch),
            route: route.clone(),
        };
        let sent = match send_payload(composer, Payload::new(sent)) {
            Ok(sent) => sent,
            Err(err) => Deferred::rejected(err),
        };
        let pending = Arc::new(pending);
        let failed = pending.clone();
        sent.then(move |response| {
            let responses = response
                .and_then(|payload| payload.cast::<ScheduledResult>())
                .map(|result| result.responses.clone())
                .unwrap_or_default();
            for (index, request) in pending.iter().enumerate() {
                match responses.get(index) {
                    Some(Either::Right(value)) => request.resolver.resolve(Reply::payload(value.clone())),
                    Some(Either::Left(err)) => request.resolver.reject(err.clone()),
                    None => request.resolver.reject(ApiError::MissingResponse.into()),
                };
            }
            RouteReply { uri: route, responses }
        })
        .catch(move |err| {
            for request in failed.iter() {
                request.resolver.reject(err.clone());
            }
            Err(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::ApiFeature;
    use crate::message::{post, send};
    use miruken_core::prelude::*;
    use miruken_runtime::{Feature, Setup};
    use std::future::IntoFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Debug)]
    struct StockQuote {
        symbol: String,
    }

    impl IntoReply for StockQuote {}

    #[derive(Debug, PartialEq)]
    struct GetStockQuote(&'static str);

    #[derive(Debug, PartialEq)]
    struct SellStock(&'static str, u32);

    #[derive(Default)]
    struct StockQuotes;

    impl StockQuotes {
        fn quote(&self, get: &GetStockQuote) -> StockQuote {
            StockQuote {
                symbol: get.0.to_string(),
            }
        }
    }

    impl Describe for StockQuotes {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.default_constructor().handles(StockQuotes::quote)
        }
    }

    #[derive(Default)]
    struct Trash {
        items: parking_lot::Mutex<Vec<Payload>>,
    }

    #[derive(Default)]
    struct TrashHandler;

    impl TrashHandler {
        fn trash(&self, routed: &Routed, trash: Dep<Trash>) -> Deferred<Option<Payload>> {
            trash.items.lock().push(routed.message().clone());
            Deferred::resolved(None)
        }
    }

    impl Describe for TrashHandler {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .default_constructor()
                .handles_with(Anchor::new().routes(["trash"]), TrashHandler::trash)
        }
    }

    fn setup() -> (Arc<Trash>, BoxHandler) {
        let trash = Arc::new(Trash::default());
        let handler = Setup::new([Arc::new(ApiFeature) as Arc<dyn Feature>])
            .spec::<StockQuotes>()
            .spec::<TrashHandler>()
            .handlers([Arc::new(miruken_core::Provider::shared(trash.clone())) as BoxHandler])
            .handler()
            .unwrap();
        (trash, handler)
    }

    async fn completed(batch: Deferred<Vec<Payload>>) -> Vec<Payload> {
        tokio::time::timeout(Duration::from_secs(5), batch.into_future())
            .await
            .expect("batch completed in time")
            .unwrap()
    }

    fn missing_response(err: &Error) -> bool {
        err.downcast_ref::<ApiError>() == Some(&ApiError::MissingResponse)
    }

    #[test]
    fn test_empty_route_is_refused() {
        assert_eq!(route_to(GetStockQuote("A"), " ").unwrap_err(), ApiError::EmptyRoute);
        let routed = route_to(GetStockQuote("A"), "http://quotes").unwrap();
        assert_eq!(routed.scheme(), "http");
    }

    #[tokio::test]
    async fn test_routed_post_reaches_trash() {
        let (trash, handler) = setup();
        post(&handler, route_to(SellStock("EX", 10), "trash").unwrap())
            .unwrap()
            .await
            .unwrap();
        let items = trash.items.lock();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].downcast_ref::<SellStock>(), Some(&SellStock("EX", 10)));
    }

    #[tokio::test]
    async fn test_pass_through_sends_locally() {
        let (_, handler) = setup();
        let quote = send::<StockQuote, _>(&handler, route_to(GetStockQuote("GOOGL"), PASS_THROUGH).unwrap())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(quote.symbol, "GOOGL");
    }

    #[test]
    fn test_unrecognized_route_is_not_handled() {
        let (_, handler) = setup();
        let err = send::<StockQuote, _>(&handler, route_to(GetStockQuote("GOOGL"), "nowhere").unwrap())
            .unwrap_err();
        assert!(err.is_not_handled());
    }

    #[tokio::test]
    async fn test_batched_route_without_responses_fails_requests() {
        let (trash, handler) = setup();
        let failed = Arc::new(AtomicUsize::new(0));
        let seen = failed.clone();
        let results = completed(
            handler
                .batch_async(move |batch| {
                    let quote = send::<StockQuote, _>(batch, route_to(GetStockQuote("GOOGL"), "trash").unwrap())?;
                    Ok(quote.then(|_| ()).catch(move |err| {
                        assert!(missing_response(&err));
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }))
                })
                .unwrap(),
        )
        .await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        assert_eq!(results.len(), 1);
        let replies = results[0].downcast_ref::<Vec<RouteReply>>().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].uri, "trash");
        assert!(replies[0].responses.is_empty());

        let items = trash.items.lock();
        assert_eq!(items.len(), 1);
        let batch = items[0].downcast_ref::<ConcurrentBatch>().unwrap();
        assert_eq!(batch.requests.len(), 1);
        assert_eq!(batch.requests[0].downcast_ref::<GetStockQuote>(), Some(&GetStockQuote("GOOGL")));
    }

    #[tokio::test]
    async fn test_batched_pass_through_groups_requests() {
        let (_, handler) = setup();
        let results = completed(
            handler
                .batch_async(|batch| {
                    let batcher = get_batch::<RouteBatcher>(batch, Some(TypeKey::of::<Routes>())).unwrap();
                    assert!(batcher.is_empty());
                    let first = send::<StockQuote, _>(batch, route_to(GetStockQuote("GOOGL"), PASS_THROUGH).unwrap())?;
                    let second = send::<StockQuote, _>(batch, route_to(GetStockQuote("APPL"), PASS_THROUGH).unwrap())?;
                    assert!(!first.is_settled());
                    assert_eq!(batcher.len(), 2);
                    Ok(Deferred::all([first, second]))
                })
                .unwrap(),
        )
        .await;

        let replies = results[0].downcast_ref::<Vec<RouteReply>>().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].uri, PASS_THROUGH);
        assert_eq!(replies[0].responses.len(), 2);
        let symbols: Vec<_> = replies[0]
            .responses
            .iter()
            .filter_map(|r| r.as_ref().into_right())
            .filter_map(|p| p.downcast_ref::<StockQuote>())
            .map(|q| q.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["GOOGL", "APPL"]);
    }

    #[tokio::test]
    async fn test_batched_quotes_resolve_from_scheduled_result() {
        let (_, handler) = setup();
        let quotes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let collected = quotes.clone();
        completed(
            handler
                .batch_async(move |batch| {
                    let quote = send::<StockQuote, _>(batch, route_to(GetStockQuote("MSFT"), PASS_THROUGH).unwrap())?;
                    Ok(quote.then(move |quote| collected.lock().push(quote.symbol.clone())))
                })
                .unwrap(),
        )
        .await;
        assert_eq!(*quotes.lock(), vec!["MSFT".to_string()]);
    }
}
