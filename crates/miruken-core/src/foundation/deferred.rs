//! Single-assignment values with optional asynchronous completion.
//!
//! A [`Deferred<T>`] is either already settled or backed by a shared future.
//! Handlers that finish synchronously produce settled values, so callers can
//! peek at them without a runtime, while asynchronous handlers produce the
//! same type and are awaited with `.await`.
//!
//! # Example
//!
//! ```rust,ignore
//! let quote = Deferred::new(|resolver| {
//!     tokio::spawn(async move {
//!         resolver.resolve(fetch_quote().await);
//!     });
//! });
//! let price = quote.then(|q| q.value).await?;
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::key::Payload;
use crate::error::{Error, Result};

type SharedFuture<T> = Shared<BoxFuture<'static, Result<T>>>;

// ============================================================================
// Cancellation
// ============================================================================

struct Cancellation {
    token: CancellationToken,
    cause: Mutex<Option<Error>>,
    linked: Mutex<Vec<Arc<Cancellation>>>,
}

impl Cancellation {
    fn new() -> Arc<Self> {
        Self::with_token(CancellationToken::new())
    }

    fn with_token(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            cause: Mutex::new(None),
            linked: Mutex::new(Vec::new()),
        })
    }

    fn child(&self) -> Arc<Self> {
        Self::with_token(self.token.child_token())
    }

    fn link(&self, others: impl IntoIterator<Item = Arc<Cancellation>>) {
        self.linked.lock().extend(others);
    }

    fn cancel(&self, cause: Error) {
        self.cause.lock().get_or_insert_with(|| cause.clone());
        self.token.cancel();
        for linked in self.linked.lock().drain(..) {
            linked.cancel(cause.clone());
        }
    }

    fn error(&self) -> Error {
        let cause = self
            .cause
            .lock()
            .clone()
            .unwrap_or_else(|| Error::custom("deferred value was canceled"));
        Error::canceled(cause)
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| Err(Error::panic(panic)))
}

// ============================================================================
// Deferred
// ============================================================================

enum State<T> {
    Settled(Result<T>),
    Pending(SharedFuture<T>),
}

/// A value or error that may not be available yet.
pub struct Deferred<T> {
    state: State<T>,
    cancel: Arc<Cancellation>,
}

impl<T: Clone> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            State::Settled(result) => State::Settled(result.clone()),
            State::Pending(shared) => State::Pending(shared.clone()),
        };
        Self {
            state,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Settled(Ok(_)) => "fulfilled",
            State::Settled(Err(_)) => "rejected",
            State::Pending(_) => "pending",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Runs `executor` immediately with a once-only [`Resolver`].
    ///
    /// A panic inside the executor rejects the value. If the executor
    /// settles before returning, the deferred is already settled.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let (tx, mut rx) = oneshot::channel();
        let cancel = Cancellation::new();
        let resolver = Resolver {
            sender: Arc::new(Mutex::new(Some(tx))),
            cancel: cancel.clone(),
        };
        let guard = resolver.clone();
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| executor(resolver))) {
            guard.reject(Error::panic(panic));
        }
        match rx.try_recv() {
            Ok(result) => Self {
                state: State::Settled(result),
                cancel,
            },
            Err(_) => Self::pending(
                async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(Error::custom("deferred value dropped before it was settled"))
                    })
                },
                cancel,
            ),
        }
    }

    /// A deferred that is already fulfilled.
    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// A deferred that is already rejected.
    pub fn rejected(err: Error) -> Self {
        Self::settled(Err(err))
    }

    /// A deferred holding `result`.
    pub fn settled(result: Result<T>) -> Self {
        Self {
            state: State::Settled(result),
            cancel: Cancellation::new(),
        }
    }

    /// Wraps a future. Panics while polling reject the value.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::pending(fut, Cancellation::new())
    }

    /// Runs `fut` on the tokio runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        Self::from_future(async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(Error::panic(err.into_panic())),
                Err(_) => Err(Error::canceled(Error::custom("task aborted"))),
            }
        })
    }

    fn pending<F>(fut: F, cancel: Arc<Cancellation>) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let watch = cancel.clone();
        let guarded = async move {
            tokio::select! {
                biased;
                _ = watch.token.cancelled() => Err(watch.error()),
                result = AssertUnwindSafe(fut).catch_unwind() => {
                    result.unwrap_or_else(|panic| Err(Error::panic(panic)))
                }
            }
        };
        Self {
            state: State::Pending(guarded.boxed().shared()),
            cancel,
        }
    }

    /// Returns true once a value or error is available.
    pub fn is_settled(&self) -> bool {
        match &self.state {
            State::Settled(_) => true,
            State::Pending(shared) => shared.peek().is_some(),
        }
    }

    /// Returns the outcome if it is available without waiting.
    pub fn peek(&self) -> Option<Result<T>> {
        match &self.state {
            State::Settled(result) => Some(result.clone()),
            State::Pending(shared) => shared.peek().cloned(),
        }
    }

    /// Cancels the computation with a default cause.
    pub fn cancel(&self) {
        self.cancel_with(Error::custom("deferred value was canceled"));
    }

    /// Cancels the computation, rejecting it with `cause` unless it already
    /// settled.
    pub fn cancel_with(&self, cause: Error) {
        self.cancel.cancel(cause);
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.token.is_cancelled()
    }

    /// Token signaled when this value is canceled.
    pub fn token(&self) -> CancellationToken {
        self.cancel.token.clone()
    }

    /// Maps the fulfilled value.
    pub fn then<R, F>(&self, f: F) -> Deferred<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.try_then(move |value| Ok(f(value)))
    }

    /// Maps the fulfilled value with a fallible function.
    pub fn try_then<R, F>(&self, f: F) -> Deferred<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R> + Send + 'static,
    {
        match &self.state {
            State::Settled(Ok(value)) => {
                let value = value.clone();
                Deferred::settled(guarded(move || f(value)))
            }
            State::Settled(Err(err)) => Deferred::rejected(err.clone()),
            State::Pending(shared) => {
                let shared = shared.clone();
                Deferred::pending(async move { f(shared.await?) }, self.cancel.child())
            }
        }
    }

    /// Chains another deferred computation.
    pub fn and_then<R, F>(&self, f: F) -> Deferred<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Deferred<R> + Send + 'static,
    {
        match &self.state {
            State::Settled(Ok(value)) => {
                let value = value.clone();
                match std::panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(next) => next,
                    Err(panic) => Deferred::rejected(Error::panic(panic)),
                }
            }
            State::Settled(Err(err)) => Deferred::rejected(err.clone()),
            State::Pending(shared) => {
                let shared = shared.clone();
                Deferred::pending(
                    async move { f(shared.await?).await },
                    self.cancel.child(),
                )
            }
        }
    }

    /// Recovers from a rejection.
    pub fn catch<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        match &self.state {
            State::Settled(Ok(_)) => self.clone(),
            State::Settled(Err(err)) => {
                let err = err.clone();
                Deferred::settled(guarded(move || f(err)))
            }
            State::Pending(shared) => {
                let shared = shared.clone();
                Deferred::pending(
                    async move {
                        match shared.await {
                            Ok(value) => Ok(value),
                            Err(err) => f(err),
                        }
                    },
                    self.cancel.child(),
                )
            }
        }
    }

    /// Rejects with a cancellation if the value is not settled within
    /// `duration`. The source computation is canceled as well.
    pub fn timeout(&self, duration: Duration) -> Deferred<T> {
        let State::Pending(shared) = &self.state else {
            return self.clone();
        };
        let shared = shared.clone();
        let source = self.cancel.clone();
        Deferred::pending(
            async move {
                match tokio::time::timeout(duration, shared).await {
                    Ok(result) => result,
                    Err(_) => {
                        let cause = Error::custom(format!("deadline of {duration:?} exceeded"));
                        source.cancel(cause.clone());
                        Err(Error::canceled(cause))
                    }
                }
            },
            self.cancel.child(),
        )
    }

    /// Waits for the value unless `token` is canceled first.
    pub async fn wait_with(self, token: &CancellationToken) -> Result<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::canceled(Error::custom("wait was canceled"))),
            result = self.into_future() => result,
        }
    }

    /// Erases the value type.
    pub fn erase(&self) -> Deferred<Payload> {
        self.then(Payload::new)
    }

    /// Fulfills with every value in input order, or rejects with the first
    /// rejection.
    pub fn all(items: impl IntoIterator<Item = Deferred<T>>) -> Deferred<Vec<T>> {
        let items: Vec<Deferred<T>> = items.into_iter().collect();
        let mut values = Vec::with_capacity(items.len());
        let mut pending = false;
        for item in &items {
            match &item.state {
                State::Settled(Ok(value)) => values.push(value.clone()),
                State::Settled(Err(err)) => return Deferred::rejected(err.clone()),
                State::Pending(_) => pending = true,
            }
        }
        if !pending {
            return Deferred::resolved(values);
        }
        let links: Vec<_> = items.iter().map(|item| item.cancel.clone()).collect();
        let all = Deferred::from_future(future::try_join_all(
            items.into_iter().map(IntoFuture::into_future),
        ));
        all.cancel.link(links);
        all
    }

    /// Settles with whichever input settles first.
    pub fn race(items: impl IntoIterator<Item = Deferred<T>>) -> Deferred<T> {
        let items: Vec<Deferred<T>> = items.into_iter().collect();
        if items.is_empty() {
            return Deferred::rejected(Error::custom("race requires at least one value"));
        }
        if let Some(settled) = items.iter().find_map(Deferred::peek) {
            return Deferred::settled(settled);
        }
        let links: Vec<_> = items.iter().map(|item| item.cancel.clone()).collect();
        let race = Deferred::from_future(
            future::select_all(items.into_iter().map(IntoFuture::into_future))
                .map(|(result, _, _)| result),
        );
        race.cancel.link(links);
        race
    }

    /// Fulfills with the first fulfilled input, or rejects with every
    /// rejection once all inputs failed.
    pub fn any(items: impl IntoIterator<Item = Deferred<T>>) -> Deferred<T> {
        let items: Vec<Deferred<T>> = items.into_iter().collect();
        if items.is_empty() {
            return Deferred::rejected(Error::custom("any requires at least one value"));
        }
        if let Some(value) = items.iter().find_map(|item| item.peek().and_then(Result::ok)) {
            return Deferred::resolved(value);
        }
        let links: Vec<_> = items.iter().map(|item| item.cancel.clone()).collect();
        let mut pending: FuturesUnordered<_> =
            items.into_iter().map(IntoFuture::into_future).collect();
        let any = Deferred::from_future(async move {
            let mut errors = Vec::new();
            while let Some(result) = pending.next().await {
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) => errors.push(err),
                }
            }
            Err(if errors.len() == 1 {
                errors.remove(0)
            } else {
                Error::Multiple(errors)
            })
        });
        any.cancel.link(links);
        any
    }
}

impl<T> IntoFuture for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self.state {
            State::Settled(result) => future::ready(result).boxed(),
            State::Pending(shared) => shared.boxed(),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Settles a [`Deferred`] created with [`Deferred::new`].
///
/// Only the first call to [`resolve`](Resolver::resolve) or
/// [`reject`](Resolver::reject) has an effect.
pub struct Resolver<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>,
    cancel: Arc<Cancellation>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> Resolver<T> {
    /// Fulfills the value. Returns false if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the value. Returns false if it was already settled.
    pub fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    fn settle(&self, result: Result<T>) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Returns true once the deferred was canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel.token.is_cancelled()
    }

    /// Completes when the deferred is canceled.
    pub async fn canceled(&self) {
        self.cancel.token.cancelled().await
    }
}
