use std::sync::Arc;

use crate::callback::{CallbackRef, Composition};
use crate::descriptor::{Describe, DescriptorFactory, HandlerDescriptor};
use crate::error::Result;
use crate::foundation::Payload;
use crate::handle_result::HandleResult;

use super::{BoxHandler, Handler};

/// A handler object together with the descriptor of its type.
///
/// The receiver is first offered to the callback directly (a `provides`
/// for the handler's own type is answered by the instance itself), then
/// the descriptor dispatches to the matching bindings.
#[derive(Clone)]
pub struct Instance {
    receiver: Payload,
    descriptor: Arc<HandlerDescriptor>,
}

impl Instance {
    /// Wraps `handler`, describing its type with the global factory.
    pub fn of<H: Describe>(handler: H) -> Result<Self> {
        Self::shared(Arc::new(handler))
    }

    pub fn shared<H: Describe>(handler: Arc<H>) -> Result<Self> {
        Self::with_factory(DescriptorFactory::global(), handler)
    }

    pub fn with_factory<H: Describe>(factory: &DescriptorFactory, handler: Arc<H>) -> Result<Self> {
        let descriptor = factory.register::<H>()?;
        Ok(Self {
            receiver: Payload::from_arc(handler),
            descriptor,
        })
    }

    pub fn from_parts(receiver: Payload, descriptor: Arc<HandlerDescriptor>) -> Self {
        Self {
            receiver,
            descriptor,
        }
    }

    pub fn receiver(&self) -> &Payload {
        &self.receiver
    }

    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }
}

impl Handler for Instance {
    fn handle(&self, callback: &CallbackRef, greedy: bool, composer: &BoxHandler) -> HandleResult {
        let callback = Composition::unwrap(callback);
        let before = callback.base().result_count();
        let mut result = callback.dispatch_receiver(&self.receiver, greedy, composer);
        if !result.should_stop(greedy) {
            result = result.or(self.descriptor.dispatch(
                Some(&self.receiver),
                &callback,
                greedy,
                composer,
                None,
            ));
        }
        result.otherwise_handled_if(callback.base().result_count() > before)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("receiver", &self.receiver)
            .field("descriptor", &self.descriptor.id())
            .finish()
    }
}
