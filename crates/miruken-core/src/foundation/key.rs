//! Callback and binding keys.
//!
//! A [`Key`] names what a callback asks for and what a binding offers. Type
//! keys take part in variance through the [`lineage`](super::lineage)
//! registry; name keys only ever match exactly.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::lineage;

/// A type-erased, shareable value.
pub type Value = Arc<dyn Any + Send + Sync>;

// ============================================================================
// TypeKey
// ============================================================================

/// Identity of a Rust type plus its name for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Returns the key of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying [`TypeId`].
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) if base.len() == self.name.len() => &self.name[pos + 2..],
            _ => self.name,
        }
    }

    /// Returns true if a value of this type may be used where `other` is
    /// expected.
    pub fn is_assignable_to(&self, other: &TypeKey) -> bool {
        self == other || lineage::is_assignable(*self, *other)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

// ============================================================================
// Key
// ============================================================================

/// What a callback requests or a binding provides.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Matches every other key.
    Any,
    /// A Rust type.
    Type(TypeKey),
    /// An opaque string key, matched exactly.
    Name(Arc<str>),
    /// An `(input, output)` pair used by bivariant policies.
    Pair(Arc<Key>, Arc<Key>),
}

impl Key {
    /// Key of the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Key::Type(TypeKey::of::<T>())
    }

    /// A string key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// An `(input, output)` pair.
    pub fn pair(input: Key, output: Key) -> Self {
        Key::Pair(Arc::new(input), Arc::new(output))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Key::Any)
    }

    pub fn as_type(&self) -> Option<TypeKey> {
        match self {
            Key::Type(key) => Some(*key),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&Key, &Key)> {
        match self {
            Key::Pair(input, output) => Some((input, output)),
            _ => None,
        }
    }

    /// Returns true if `self` can stand in for `other`.
    ///
    /// [`Key::Any`] on the right accepts everything, type keys follow the
    /// lineage registry, name keys compare exactly and pairs compare
    /// component-wise.
    pub fn is_assignable_to(&self, other: &Key) -> bool {
        match (self, other) {
            (_, Key::Any) => true,
            (Key::Type(a), Key::Type(b)) => a.is_assignable_to(b),
            (Key::Pair(a_in, a_out), Key::Pair(b_in, b_out)) => {
                a_in.is_assignable_to(b_in) && a_out.is_assignable_to(b_out)
            }
            (a, b) => a == b,
        }
    }
}

impl From<TypeKey> for Key {
    fn from(key: TypeKey) -> Self {
        Key::Type(key)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name.into())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Any => f.write_str("*"),
            Key::Type(key) => write!(f, "{key}"),
            Key::Name(name) => write!(f, "\"{name}\""),
            Key::Pair(input, output) => write!(f, "({input} -> {output})"),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// A type-erased value tagged with its [`TypeKey`].
///
/// Payloads carry callback sources and results through the engine. Values
/// are reference counted so a resolved singleton keeps its identity.
#[derive(Clone)]
pub struct Payload {
    key: TypeKey,
    value: Value,
}

impl Payload {
    /// Wraps an owned value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            value,
        }
    }

    /// Wraps an erased value whose concrete type is `key`.
    ///
    /// Returns `None` when `key` does not describe the value.
    pub fn from_value(key: TypeKey, value: Value) -> Option<Self> {
        ((*value).type_id() == key.id()).then_some(Self { key, value })
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is<T: Any>(&self) -> bool {
        self.key.id() == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns the shared value if it is exactly a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Returns this payload viewed as `to`, upcasting along the lineage
    /// when the types differ.
    pub fn upcast(&self, to: TypeKey) -> Option<Payload> {
        if self.key == to {
            return Some(self.clone());
        }
        lineage::upcast(&self.value, self.key, to).map(|value| Payload { key: to, value })
    }

    /// Returns the value as a `T`, upcasting if needed.
    pub fn cast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.downcast::<T>()
            .or_else(|| self.upcast(TypeKey::of::<T>())?.downcast::<T>())
    }

    /// Returns true if both payloads share the same allocation.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Address used to identify the underlying allocation.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.key)
    }
}
