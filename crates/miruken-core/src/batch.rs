//! Batching: collect callbacks while a batch is open and complete them
//! together.
//!
//! [`batch`] wraps a handler in a [`BatchHandler`] and runs `configure`
//! with it. Participants joined to the [`Batch`] (any [`Batching`]
//! handler) see every batchable callback first; when `configure` returns,
//! each participant completes and the batch resolves with their results.
//!
//! ```rust,ignore
//! let results = batch(&handler, |batched| {
//!     batched.command(SendEmail::to("ann@example.com"))?;
//!     batched.command(SendEmail::to("bob@example.com"))?;
//!     Ok(())
//! })?
//! .await?;
//! ```

use std::any::Any;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::callback::{Callback, CallbackRef, Composition};
use crate::error::{Error, Result};
use crate::foundation::{Deferred, Key, Payload, TypeKey};
use crate::handle_result::HandleResult;
use crate::handler::compose::handle_each;
use crate::handler::{BoxHandler, Handler};
use crate::provides::Provides;

/// A handler that collects callbacks until the batch completes.
pub trait Batching: Handler {
    fn complete(&self, composer: &BoxHandler) -> Result<Deferred<Payload>>;
}

struct Participant {
    key: TypeKey,
    value: Arc<dyn Any + Send + Sync>,
    handler: BoxHandler,
    batching: Arc<dyn Batching>,
}

// ============================================================================
// Batch
// ============================================================================

/// The participants of an open batch.
#[derive(Default)]
pub struct Batch {
    participants: RwLock<Vec<Participant>>,
    tags: Vec<TypeKey>,
}

impl Batch {
    pub fn new(tags: impl IntoIterator<Item = TypeKey>) -> Self {
        Self {
            participants: RwLock::default(),
            tags: tags.into_iter().collect(),
        }
    }

    /// An untagged batch accepts everything; a tagged one only its tags.
    pub fn should_batch(&self, tag: Option<TypeKey>) -> bool {
        self.tags.is_empty() || tag.is_some_and(|tag| self.tags.contains(&tag))
    }

    /// The participant of type `B`, joined on first use.
    pub fn participant<B: Batching + Default>(&self) -> Arc<B> {
        let key = TypeKey::of::<B>();
        let mut participants = self.participants.write();
        if let Some(existing) = participants
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.value.clone().downcast::<B>().ok())
        {
            return existing;
        }
        let participant = Arc::new(B::default());
        participants.push(Participant {
            key,
            value: participant.clone(),
            handler: participant.clone(),
            batching: participant.clone(),
        });
        participant
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Batching>> {
        self.participants.read().iter().map(|p| p.batching.clone()).collect()
    }

    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let handlers: Vec<BoxHandler> = self.participants.read().iter().map(|p| p.handler.clone()).collect();
        handle_each(&handlers, callback, greedy, composer)
    }

    fn complete(&self, composer: &BoxHandler) -> Deferred<Vec<Payload>> {
        let mut results = Vec::new();
        for participant in self.snapshot() {
            match participant.complete(composer) {
                Ok(result) => results.push(result),
                Err(err) => return Deferred::rejected(err),
            }
        }
        Deferred::all(results)
    }
}

// ============================================================================
// BatchHandler
// ============================================================================

/// Routes batchable callbacks to the open batch before the inner handler.
pub struct BatchHandler {
    inner: BoxHandler,
    batch: RwLock<Option<Arc<Batch>>>,
    completed: AtomicBool,
}

impl BatchHandler {
    pub fn new(inner: BoxHandler, tags: impl IntoIterator<Item = TypeKey>) -> Self {
        Self {
            inner,
            batch: RwLock::new(Some(Arc::new(Batch::new(tags)))),
            completed: AtomicBool::new(false),
        }
    }

    /// Closes the batch and completes every participant through `composer`.
    ///
    /// Callbacks arriving afterwards bypass the batch.
    pub fn complete(&self, composer: &BoxHandler) -> Deferred<Vec<Payload>> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Deferred::rejected(Error::custom("batch has already completed"));
        }
        // Released before completing: participants dispatch through `composer`.
        let batch = self.batch.write().take();
        match batch {
            Some(batch) => {
                debug!(participants = batch.len(), "completing batch");
                batch.complete(composer)
            }
            None => Deferred::resolved(Vec::new()),
        }
    }
}

impl Handler for BatchHandler {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let batch = self.batch.read().clone();
        if let Some(batch) = batch {
            let unwrapped = Composition::unwrap(callback);
            if let Some(provides) = unwrapped.downcast_ref::<Provides>()
                && provides.key() == Key::of::<Batch>()
            {
                return provides.dispatch_receiver(&Payload::from_arc(batch), greedy, composer);
            }
            if callback.can_batch() {
                let result = batch.handle(callback, greedy, composer);
                if result.is_handled() && !result.is_stop() {
                    return result;
                }
            }
        }
        self.inner.handle(callback, greedy, composer)
    }
}

// ============================================================================
// NoBatch
// ============================================================================

/// Sends callbacks past any open batch.
pub struct NoBatch {
    inner: BoxHandler,
}

impl NoBatch {
    pub fn new(inner: BoxHandler) -> Self {
        Self { inner }
    }
}

impl Handler for NoBatch {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let unwrapped = Composition::unwrap(callback);
        if unwrapped
            .downcast_ref::<Provides>()
            .is_some_and(|p| p.key() == Key::of::<Batch>())
        {
            return HandleResult::NOT_HANDLED;
        }
        let callback: CallbackRef = Arc::new(Composition::without_batch(callback.clone()));
        self.inner.handle(&callback, greedy, composer)
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Runs `configure` inside a batch and completes it.
pub fn batch<F>(handler: &BoxHandler, configure: F) -> Result<Deferred<Vec<Payload>>>
where
    F: FnOnce(&BoxHandler) -> Result<()>,
{
    open(handler, Vec::new(), configure)
}

/// Like [`batch`], only participants tagged with `T` join.
pub fn batch_tag<T: 'static, F>(handler: &BoxHandler, configure: F) -> Result<Deferred<Vec<Payload>>>
where
    F: FnOnce(&BoxHandler) -> Result<()>,
{
    open(handler, vec![TypeKey::of::<T>()], configure)
}

/// Runs an asynchronous `configure` and completes the batch as soon as it
/// returns. The results are available once both have settled and fail if
/// either fails.
///
/// The deferred returned by `configure` usually waits on the batch, so the
/// two are awaited together.
pub fn batch_async<T, F>(handler: &BoxHandler, configure: F) -> Result<Deferred<Vec<Payload>>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(&BoxHandler) -> Result<Deferred<T>>,
{
    let (batcher, composer) = batch_handler(handler, Vec::new());
    let configured = configure(&composer)?;
    let results = batcher.complete(&composer);
    Ok(Deferred::from_future(async move {
        let (configured, results) = futures::join!(configured.into_future(), results.into_future());
        configured?;
        results
    }))
}

fn open<F>(handler: &BoxHandler, tags: Vec<TypeKey>, configure: F) -> Result<Deferred<Vec<Payload>>>
where
    F: FnOnce(&BoxHandler) -> Result<()>,
{
    let (batcher, composer) = batch_handler(handler, tags);
    configure(&composer)?;
    Ok(batcher.complete(&composer))
}

fn batch_handler(handler: &BoxHandler, tags: Vec<TypeKey>) -> (Arc<BatchHandler>, BoxHandler) {
    let batcher = Arc::new(BatchHandler::new(handler.clone(), tags));
    let composer: BoxHandler = batcher.clone();
    (batcher, composer)
}

/// The participant of type `B` in the batch open on `handler`, if any and
/// if the batch accepts `tag`.
pub fn get_batch<B: Batching + Default>(handler: &BoxHandler, tag: Option<TypeKey>) -> Option<Arc<B>> {
    let batch = Arc::new(Provides::of::<Batch>().build())
        .resolve(handler)
        .ok()?
        .ready()
        .flatten()?
        .downcast::<Batch>()?;
    batch.should_batch(tag).then(|| batch.participant::<B>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{Received, Resolution};
    use crate::foundation::Resolver;
    use crate::handler::HandlerFn;
    use crate::handles::Handles;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SendEmail(&'static str);

    #[derive(Default)]
    struct Outbox {
        queued: Mutex<Vec<(&'static str, Resolver<Vec<Payload>>)>>,
    }

    impl Handler for Outbox {
        fn handle(&self, callback: &CallbackRef, _greedy: bool, composer: &BoxHandler) -> HandleResult {
            let Some(email) = callback.source().and_then(|s| s.downcast::<SendEmail>()) else {
                return HandleResult::NOT_HANDLED;
            };
            let mut resolver = None;
            let pending = Deferred::new(|r| resolver = Some(r));
            if let Some(resolver) = resolver {
                self.queued.lock().push((email.0, resolver));
            }
            callback.receive_result(Received::Pending(pending), false, composer)
        }
    }

    impl Batching for Outbox {
        fn complete(&self, _composer: &BoxHandler) -> Result<Deferred<Payload>> {
            let queued = std::mem::take(&mut *self.queued.lock());
            let count = queued.len();
            for (to, resolver) in queued {
                resolver.resolve(vec![Payload::new(format!("sent to {to}"))]);
            }
            Ok(Deferred::resolved(Payload::new(count)))
        }
    }

    #[derive(Default)]
    struct Digest {
        queued: AtomicUsize,
    }

    impl Handler for Digest {
        fn handle(&self, callback: &CallbackRef, _greedy: bool, _composer: &BoxHandler) -> HandleResult {
            if callback.source().is_some_and(|s| s.is::<SendEmail>()) {
                self.queued.fetch_add(1, Ordering::SeqCst);
                HandleResult::HANDLED
            } else {
                HandleResult::NOT_HANDLED
            }
        }
    }

    impl Batching for Digest {
        fn complete(&self, composer: &BoxHandler) -> Result<Deferred<Payload>> {
            let queued = self.queued.swap(0, Ordering::SeqCst);
            Arc::new(Handles::new(SendEmail("digest"))).execute(composer, false)?;
            Ok(Deferred::resolved(Payload::new(queued)))
        }
    }

    fn mailer(sent: &Arc<AtomicUsize>) -> BoxHandler {
        let sent = sent.clone();
        Arc::new(HandlerFn::new(move |callback, _, _| {
            if callback.source().is_some_and(|s| s.is::<SendEmail>()) {
                sent.fetch_add(1, Ordering::SeqCst);
                HandleResult::HANDLED
            } else {
                HandleResult::NOT_HANDLED
            }
        }))
    }

    #[tokio::test]
    async fn test_batched_commands_complete_together() {
        let sent = Arc::new(AtomicUsize::new(0));
        let handler = mailer(&sent);
        let mut replies = Vec::new();
        let results = batch(&handler, |batched| {
            assert!(get_batch::<Outbox>(batched, None).is_some());
            for to in ["ann", "bob"] {
                replies.push(Arc::new(Handles::new(SendEmail(to))).execute(batched, false)?);
            }
            Ok(())
        })
        .unwrap()
        .await
        .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].downcast_ref::<usize>(), Some(&2));
        let Resolution::Pending(first) = replies.remove(0) else {
            panic!("expected a pending reply");
        };
        let first = first.await.unwrap();
        assert_eq!(first[0].downcast_ref::<String>().map(String::as_str), Some("sent to ann"));
    }

    #[test]
    fn test_no_batch_and_tags_bypass_the_batch() {
        let sent = Arc::new(AtomicUsize::new(0));
        let handler = mailer(&sent);
        batch(&handler, |batched| {
            get_batch::<Outbox>(batched, None);
            let direct: BoxHandler = Arc::new(NoBatch::new(batched.clone()));
            Arc::new(Handles::new(SendEmail("ann"))).execute(&direct, false)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        batch_tag::<Outbox, _>(&handler, |batched| {
            assert!(get_batch::<Outbox>(batched, None).is_none());
            assert!(get_batch::<Outbox>(batched, Some(TypeKey::of::<Outbox>())).is_some());
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_participants_complete_through_the_composer() {
        let sent = Arc::new(AtomicUsize::new(0));
        let handler = mailer(&sent);
        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            batch_async(&handler, |batched| {
                assert!(get_batch::<Digest>(batched, None).is_some());
                for to in ["ann", "bob"] {
                    Arc::new(Handles::new(SendEmail(to))).execute(batched, false)?;
                }
                Ok(Deferred::resolved(()))
            })
            .unwrap()
            .await
        })
        .await;

        let results = completed.expect("batch completed in time").unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert_eq!(results[0].downcast_ref::<usize>(), Some(&2));
    }
}
