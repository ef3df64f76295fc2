use std::future::IntoFuture;

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::Result;
use crate::foundation::Deferred;

/// A value that is either available now or will be.
///
/// Handler operations return a `Resolution` so callers whose handlers are
/// all synchronous never touch a future, while `.await` works uniformly.
#[derive(Clone, Debug)]
pub enum Resolution<T> {
    Ready(T),
    Pending(Deferred<T>),
}

impl<T> Resolution<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn is_ready(&self) -> bool {
        matches!(self, Resolution::Ready(_))
    }

    /// The value, if it was available without waiting.
    pub fn ready(self) -> Option<T> {
        match self {
            Resolution::Ready(value) => Some(value),
            Resolution::Pending(pending) => pending.peek().and_then(Result::ok),
        }
    }

    pub fn map<R, F>(self, f: F) -> Resolution<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        match self {
            Resolution::Ready(value) => Resolution::Ready(f(value)),
            Resolution::Pending(pending) => Resolution::Pending(pending.then(f)),
        }
    }

    pub fn try_map<R, F>(self, f: F) -> Result<Resolution<R>>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R> + Send + 'static,
    {
        Ok(match self {
            Resolution::Ready(value) => Resolution::Ready(f(value)?),
            Resolution::Pending(pending) => Resolution::Pending(pending.try_then(f)),
        })
    }

    pub fn into_deferred(self) -> Deferred<T> {
        match self {
            Resolution::Ready(value) => Deferred::resolved(value),
            Resolution::Pending(pending) => pending,
        }
    }
}

impl<T> IntoFuture for Resolution<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Resolution::Ready(value) => future::ready(Ok(value)).boxed(),
            Resolution::Pending(pending) => pending.into_future(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_and_pending_await_alike() {
        let ready = Resolution::Ready(2).map(|v| v * 2);
        assert!(ready.is_ready());
        assert_eq!(ready.await.unwrap(), 4);

        let pending = Resolution::Pending(Deferred::spawn(async { Ok(2) })).map(|v| v * 2);
        assert!(!pending.is_ready());
        assert_eq!(pending.await.unwrap(), 4);
    }

    #[test]
    fn test_try_map_propagates_errors() {
        let failed = Resolution::Ready(1).try_map(|_| -> Result<i32> {
            Err(crate::Error::custom("bad"))
        });
        assert!(failed.is_err());
        assert_eq!(Resolution::Ready(3).ready(), Some(3));
    }
}
