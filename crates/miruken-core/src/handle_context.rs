//! The record handed to filters and argument resolvers for one binding call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::binding::Binding;
use crate::callback::CallbackRef;
use crate::error::{Error, Result};
use crate::foundation::Payload;
use crate::handler::BoxHandler;

/// Everything known about the binding being invoked.
///
/// Contexts are cheap to clone; filters that forward a modified dispatch
/// build a new one with [`with_composer`](Self::with_composer).
#[derive(Clone)]
pub struct HandleContext {
    receiver: Option<Payload>,
    callback: CallbackRef,
    binding: Arc<Binding>,
    composer: BoxHandler,
    greedy: bool,
    token: Option<CancellationToken>,
}

impl HandleContext {
    pub fn new(
        receiver: Option<Payload>,
        callback: CallbackRef,
        binding: Arc<Binding>,
        composer: BoxHandler,
        greedy: bool,
    ) -> Self {
        Self {
            receiver,
            callback,
            binding,
            composer,
            greedy,
            token: None,
        }
    }

    /// The handler instance owning the binding, if any.
    pub fn receiver(&self) -> Option<&Payload> {
        self.receiver.as_ref()
    }

    /// The receiver as a `H`.
    pub fn receiver_as<H: Send + Sync + 'static>(&self) -> Result<Arc<H>> {
        self.receiver
            .as_ref()
            .and_then(|receiver| receiver.cast::<H>())
            .ok_or_else(|| {
                Error::custom(format!(
                    "binding {} has no receiver of type {}",
                    self.binding,
                    std::any::type_name::<H>()
                ))
            })
    }

    /// The callback source as a `M`.
    pub fn source_as<M: Send + Sync + 'static>(&self) -> Result<Arc<M>> {
        self.callback
            .source()
            .and_then(|source| source.cast::<M>())
            .ok_or_else(|| Error::UnresolvedArg {
                index: 0,
                type_name: std::any::type_name::<M>(),
                reason: format!("{} carries no assignable source", self.callback.describe()),
            })
    }

    pub fn callback(&self) -> &CallbackRef {
        &self.callback
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    /// The handler used to resolve dependencies and forward dispatches.
    pub fn composer(&self) -> &BoxHandler {
        &self.composer
    }

    pub fn greedy(&self) -> bool {
        self.greedy
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Returns true when the dispatch was canceled.
    pub fn is_canceled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn with_composer(&self, composer: BoxHandler) -> Self {
        Self {
            composer,
            ..self.clone()
        }
    }

    pub(crate) fn with_token(mut self, token: Option<CancellationToken>) -> Self {
        self.token = token;
        self
    }
}

impl std::fmt::Debug for HandleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleContext")
            .field("callback", &self.callback.describe())
            .field("binding", &self.binding)
            .field("greedy", &self.greedy)
            .finish_non_exhaustive()
    }
}
