use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::binding::Binding;
use crate::error::{Error, Result};
use crate::foundation::TypeKey;

use super::{Describe, HandlerDescriptor, HandlerSpec};

/// Notified as descriptors are built.
pub trait BindingObserver: Send + Sync + 'static {
    fn binding_created(&self, _binding: &Arc<Binding>) {}

    fn descriptor_created(&self, _descriptor: &Arc<HandlerDescriptor>) {}
}

type Cache = HashMap<TypeKey, Arc<HandlerDescriptor>>;

#[derive(Default)]
struct Inner {
    descriptors: RwLock<Arc<Cache>>,
    building: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn BindingObserver>>>,
}

/// Builds and caches handler descriptors by identity.
///
/// Lookups read an immutable snapshot of the cache; registrations are
/// serialized and publish a new snapshot. Cloning shares the cache.
#[derive(Clone, Default)]
pub struct DescriptorFactory {
    inner: Arc<Inner>,
}

static GLOBAL: LazyLock<DescriptorFactory> = LazyLock::new(DescriptorFactory::new);

impl DescriptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide factory used when none is given explicitly.
    pub fn global() -> &'static DescriptorFactory {
        &GLOBAL
    }

    pub fn observe(&self, observer: Arc<dyn BindingObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// The cached descriptor for `id`, if any.
    pub fn descriptor(&self, id: TypeKey) -> Option<Arc<HandlerDescriptor>> {
        self.inner.descriptors.read().get(&id).cloned()
    }

    /// Every cached descriptor.
    pub fn descriptors(&self) -> Vec<Arc<HandlerDescriptor>> {
        self.inner.descriptors.read().values().cloned().collect()
    }

    /// Number of cached descriptors; grows with every registration.
    pub fn len(&self) -> usize {
        self.inner.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describes and caches the handler type `H`.
    pub fn register<H: Describe>(&self) -> Result<Arc<HandlerDescriptor>> {
        if let Some(descriptor) = self.descriptor(TypeKey::of::<H>()) {
            return Ok(descriptor);
        }
        self.register_spec(HandlerSpec::of::<H>())
            .map(|(descriptor, _)| descriptor)
    }

    /// Builds the descriptor for `spec` unless one with the same identity
    /// exists. Returns the descriptor and whether it was added.
    pub fn register_spec(&self, spec: HandlerSpec) -> Result<(Arc<HandlerDescriptor>, bool)> {
        let _building = self.inner.building.lock();
        if let Some(descriptor) = self.descriptor(spec.id) {
            return Ok((descriptor, false));
        }
        let HandlerSpec {
            id,
            owner,
            bindings,
            providers,
            receiver_filter,
            mut errors,
        } = spec;
        if !errors.is_empty() {
            return Err(if errors.len() == 1 {
                errors.remove(0)
            } else {
                Error::Multiple(errors)
            });
        }

        let bindings: Vec<Arc<Binding>> = bindings.into_iter().map(Arc::new).collect();
        let descriptor = Arc::new(
            HandlerDescriptor::new(id, owner, bindings.clone(), providers).with_receiver_filter(receiver_filter),
        );

        let mut cache = Cache::clone(&self.inner.descriptors.read());
        cache.insert(id, descriptor.clone());
        *self.inner.descriptors.write() = Arc::new(cache);
        debug!(handler = %id, bindings = bindings.len(), "descriptor created");

        let observers = self.inner.observers.read().clone();
        for observer in &observers {
            for binding in &bindings {
                observer.binding_created(binding);
            }
            observer.descriptor_created(&descriptor);
        }
        Ok((descriptor, true))
    }
}
