use std::fmt;
use std::sync::Arc;

use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::foundation::{Deferred, Payload, TypeKey};
use crate::handle_result::HandleResult;

// ============================================================================
// Reply
// ============================================================================

/// What a binding returned: values, an explicit result and effects.
#[derive(Clone, Default)]
pub struct Reply {
    values: Vec<Payload>,
    result: Option<HandleResult>,
    effects: Vec<Arc<dyn Effect>>,
}

impl Reply {
    /// No values.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single owned value.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::payload(Payload::new(value))
    }

    /// A single shared value.
    pub fn shared<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::payload(Payload::from_arc(value))
    }

    pub fn payload(payload: Payload) -> Self {
        Self {
            values: vec![payload],
            ..Self::default()
        }
    }

    pub fn many(values: impl IntoIterator<Item = Payload>) -> Self {
        Self {
            values: values.into_iter().collect(),
            ..Self::default()
        }
    }

    /// An explicit dispatch result and no values.
    pub fn from_result(result: HandleResult) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// Attaches an explicit dispatch result.
    pub fn with_result(mut self, result: HandleResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Attaches an effect applied once the reply is accepted.
    pub fn effect(mut self, effect: impl Effect) -> Self {
        self.effects.push(Arc::new(effect));
        self
    }

    pub fn effect_arc(mut self, effect: Arc<dyn Effect>) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn values(&self) -> &[Payload] {
        &self.values
    }

    pub fn result(&self) -> Option<&HandleResult> {
        self.result.as_ref()
    }

    pub fn effects(&self) -> &[Arc<dyn Effect>] {
        &self.effects
    }

    pub(crate) fn into_parts(self) -> (Vec<Payload>, Vec<Arc<dyn Effect>>) {
        (self.values, self.effects)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("values", &self.values)
            .field("result", &self.result)
            .field("effects", &self.effects.len())
            .finish()
    }
}

// ============================================================================
// Output
// ============================================================================

/// A reply that may still be computing.
#[derive(Clone, Debug)]
pub enum Output {
    Ready(Reply),
    Pending(Deferred<Reply>),
}

impl Output {
    pub fn is_pending(&self) -> bool {
        matches!(self, Output::Pending(_))
    }

    pub fn into_deferred(self) -> Deferred<Reply> {
        match self {
            Output::Ready(reply) => Deferred::resolved(reply),
            Output::Pending(pending) => pending,
        }
    }

    /// Transforms the reply now, or once it is available.
    pub fn map<F>(self, f: F) -> Result<Output>
    where
        F: FnOnce(Reply) -> Result<Reply> + Send + 'static,
    {
        match self {
            Output::Ready(reply) => f(reply).map(Output::Ready),
            Output::Pending(pending) => Ok(Output::Pending(pending.try_then(f))),
        }
    }
}

impl From<Reply> for Output {
    fn from(reply: Reply) -> Self {
        Output::Ready(reply)
    }
}

// ============================================================================
// IntoReply
// ============================================================================

/// Return types a binding may produce.
///
/// Domain types opt in with an empty impl; the defaults return the value
/// itself keyed by its own type.
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Quote { symbol: String, value: f64 }
///
/// impl IntoReply for Quote {}
/// ```
pub trait IntoReply: Send + Sync + Sized + 'static {
    /// Type produced once any deferred wrapper is removed.
    fn output_key() -> Option<TypeKey> {
        Some(TypeKey::of::<Self>())
    }

    /// Element type when the output is a collection.
    fn element_key() -> Option<TypeKey> {
        None
    }

    fn is_async() -> bool {
        false
    }

    /// Converts the return value. Collections are flattened unless `strict`.
    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(Reply::value(self)))
    }
}

impl IntoReply for () {
    fn output_key() -> Option<TypeKey> {
        None
    }

    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(Reply::none()))
    }
}

impl IntoReply for HandleResult {
    fn output_key() -> Option<TypeKey> {
        None
    }

    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(Reply::from_result(self)))
    }
}

impl IntoReply for Reply {
    fn output_key() -> Option<TypeKey> {
        None
    }

    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(self))
    }
}

impl IntoReply for Payload {
    fn output_key() -> Option<TypeKey> {
        None
    }

    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(Reply::payload(self)))
    }
}

impl<T: Send + Sync + 'static> IntoReply for Arc<T> {
    fn output_key() -> Option<TypeKey> {
        Some(TypeKey::of::<T>())
    }

    fn into_output(self, _strict: bool) -> Result<Output> {
        Ok(Output::Ready(Reply::shared(self)))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn output_key() -> Option<TypeKey> {
        T::output_key()
    }

    fn element_key() -> Option<TypeKey> {
        T::element_key()
    }

    fn is_async() -> bool {
        T::is_async()
    }

    fn into_output(self, strict: bool) -> Result<Output> {
        match self {
            Some(value) => value.into_output(strict),
            None => Ok(Output::Ready(Reply::none())),
        }
    }
}

impl<T, E> IntoReply for std::result::Result<T, E>
where
    T: IntoReply,
    E: Into<Error> + Send + Sync + 'static,
{
    fn output_key() -> Option<TypeKey> {
        T::output_key()
    }

    fn element_key() -> Option<TypeKey> {
        T::element_key()
    }

    fn is_async() -> bool {
        T::is_async()
    }

    fn into_output(self, strict: bool) -> Result<Output> {
        self.map_err(Into::into)?.into_output(strict)
    }
}

impl<T: Send + Sync + 'static> IntoReply for Vec<T> {
    fn element_key() -> Option<TypeKey> {
        Some(TypeKey::of::<T>())
    }

    fn into_output(self, strict: bool) -> Result<Output> {
        let reply = if strict {
            Reply::value(self)
        } else {
            Reply::many(self.into_iter().map(Payload::new))
        };
        Ok(Output::Ready(reply))
    }
}

impl<T: IntoReply + Clone> IntoReply for Deferred<T> {
    fn output_key() -> Option<TypeKey> {
        T::output_key()
    }

    fn element_key() -> Option<TypeKey> {
        T::element_key()
    }

    fn is_async() -> bool {
        true
    }

    fn into_output(self, strict: bool) -> Result<Output> {
        Ok(Output::Pending(self.and_then(move |value| {
            match value.into_output(strict) {
                Ok(output) => output.into_deferred(),
                Err(err) => Deferred::rejected(err),
            }
        })))
    }
}

macro_rules! impl_into_reply {
    ($($ty:ty),* $(,)?) => {
        $( impl IntoReply for $ty {} )*
    };
}

impl_into_reply!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn values(output: Output) -> Vec<Payload> {
        match output {
            Output::Ready(reply) => reply.values().to_vec(),
            Output::Pending(pending) => pending.peek().unwrap().unwrap().values().to_vec(),
        }
    }

    #[test]
    fn test_collections_flatten_unless_strict() {
        let flat = values(vec![1_i32, 2, 3].into_output(false).unwrap());
        assert_eq!(flat.len(), 3);
        assert!(flat[0].is::<i32>());

        let strict = values(vec![1_i32, 2, 3].into_output(true).unwrap());
        assert_eq!(strict.len(), 1);
        assert!(strict[0].is::<Vec<i32>>());
    }

    #[test]
    fn test_deferred_outputs_unwrap_to_the_same_reply() {
        assert!(<Deferred<String> as IntoReply>::is_async());
        assert_eq!(
            <Deferred<String> as IntoReply>::output_key(),
            <String as IntoReply>::output_key()
        );
        let sync = values(String::from("x").into_output(false).unwrap());
        let deferred = values(Deferred::resolved(String::from("x")).into_output(false).unwrap());
        assert_eq!(sync[0].downcast_ref::<String>(), deferred[0].downcast_ref::<String>());
    }

    #[test]
    fn test_errors_and_options() {
        let err: std::result::Result<u8, Error> = Err(Error::custom("down"));
        assert!(err.into_output(false).is_err());
        assert!(values(None::<u8>.into_output(false).unwrap()).is_empty());
        assert_eq!(<Option<Arc<u8>> as IntoReply>::output_key(), Some(TypeKey::of::<u8>()));
    }
}
