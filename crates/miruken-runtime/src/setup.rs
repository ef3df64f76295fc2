//! Assembling the root handler of an application.
//!
//! [`Setup`] collects handler specs, explicit handlers, values, options,
//! filters and layers, lets [`Feature`]s contribute to all of them, and
//! builds either a composite [`BoxHandler`] or a bootstrapped root
//! [`Context`].
//!
//! ```rust,ignore
//! let context = Setup::new([Arc::new(LogFeature::new(1)) as Arc<dyn Feature>])
//!     .spec::<Orders>()
//!     .with(Clock::utc())
//!     .context()
//!     .await?;
//! ```
//!
//! Features install level by level: the features given to the setup
//! first, then everything they depend on. A feature that should only be
//! installed once guards itself with [`Setup::can_install`], so the first
//! installation of a kind wins and top-level features override defaults
//! pulled in as dependencies.

use std::any::TypeId;
use std::collections::{HashSet, VecDeque};
use std::mem;
use std::sync::Arc;

use miruken_core::handler::{OptionsLayer, WithValues};
use miruken_core::validates;
use miruken_core::{
    BoxHandler, Context, Describe, DescriptorFactory, FilterProvider, HandlerSpec, Handlers,
    Inference, Merge, Provider,
};
use tower_layer::Layer;
use tracing::{debug, info, warn};

use crate::bootstrap::{Bootstrap, Bootstrapper, SetupOptions};
use crate::config::{ConfigProvider, SetupConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// A reusable piece of setup.
pub trait Feature: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Features installed after this one.
    fn depends_on(&self) -> Vec<Arc<dyn Feature>> {
        Vec::new()
    }

    fn install(&self, setup: &mut Setup) -> RuntimeResult<()>;

    /// Runs once the handler is built.
    fn after_install(&self, _setup: &Setup, _handler: &BoxHandler) -> RuntimeResult<()> {
        Ok(())
    }
}

type LayerFn = Box<dyn Fn(BoxHandler) -> BoxHandler + Send + Sync>;
type ExcludeFn = Box<dyn Fn(&HandlerSpec) -> bool + Send + Sync>;

/// Builder for the root handler.
pub struct Setup {
    features: Vec<Arc<dyn Feature>>,
    installed: Vec<Arc<dyn Feature>>,
    specs: Vec<HandlerSpec>,
    handlers: Vec<BoxHandler>,
    layers: Vec<LayerFn>,
    excludes: Vec<ExcludeFn>,
    factory: Option<DescriptorFactory>,
    inference: bool,
    tags: HashSet<TypeId>,
    bootstraps: Vec<Arc<dyn Bootstrap>>,
}

impl Default for Setup {
    fn default() -> Self {
        Self::new([])
    }
}

impl Setup {
    pub fn new(features: impl IntoIterator<Item = Arc<dyn Feature>>) -> Self {
        Self {
            features: features.into_iter().collect(),
            installed: Vec::new(),
            specs: Vec::new(),
            handlers: Vec::new(),
            layers: Vec::new(),
            excludes: Vec::new(),
            factory: None,
            inference: true,
            tags: HashSet::new(),
            bootstraps: Vec::new(),
        }
    }

    pub fn feature(&mut self, feature: impl Feature) -> &mut Self {
        self.features.push(Arc::new(feature));
        self
    }

    pub fn specs(&mut self, specs: impl IntoIterator<Item = HandlerSpec>) -> &mut Self {
        self.specs.extend(specs);
        self
    }

    pub fn spec<H: Describe>(&mut self) -> &mut Self {
        self.specs.push(HandlerSpec::of::<H>());
        self
    }

    /// Handlers consulted before anything inferred from specs.
    pub fn handlers(&mut self, handlers: impl IntoIterator<Item = BoxHandler>) -> &mut Self {
        self.handlers.extend(handlers);
        self
    }

    /// Provides `value` to every dispatch.
    pub fn with<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.layer(WithValues::new().value(value))
    }

    pub fn options<T: Merge>(&mut self, options: T) -> &mut Self {
        self.layer(OptionsLayer::new(options))
    }

    /// Applies `providers` to every binding reached through the handler.
    pub fn filters(
        &mut self,
        providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>,
    ) -> &mut Self {
        self.layer(miruken_core::handler::FilterLayer::providers(providers))
    }

    /// Wraps the built handler; later layers wrap earlier ones.
    pub fn layer<L>(&mut self, layer: L) -> &mut Self
    where
        L: Layer<BoxHandler, Service = BoxHandler> + Send + Sync + 'static,
    {
        self.layers.push(Box::new(move |handler| layer.layer(handler)));
        self
    }

    pub fn without_inference(&mut self) -> &mut Self {
        self.inference = false;
        self
    }

    /// Skips every spec matching `predicate`.
    pub fn exclude(
        &mut self,
        predicate: impl Fn(&HandlerSpec) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.excludes.push(Box::new(predicate));
        self
    }

    /// Registers specs with `factory` instead of a new one.
    pub fn factory(&mut self, factory: DescriptorFactory) -> &mut Self {
        self.factory = Some(factory);
        self
    }

    /// Adds a bootstrap started with the root context.
    pub fn bootstrap(&mut self, bootstrap: Arc<dyn Bootstrap>) -> &mut Self {
        self.bootstraps.push(bootstrap);
        self
    }

    /// Applies the `setup` section of the configuration.
    pub fn configure(&mut self, config: &SetupConfig) -> &mut Self {
        if !config.inference {
            self.without_inference();
        }
        self.options(SetupOptions {
            startup_timeout: config.startup_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// True the first time it is called for `T`.
    pub fn can_install<T: 'static>(&mut self) -> bool {
        self.tags.insert(TypeId::of::<T>())
    }

    /// Builds the composite handler.
    pub fn handler(&mut self) -> RuntimeResult<BoxHandler> {
        let mut errors = self.install_features();
        let handler = self.assemble()?;
        for feature in mem::take(&mut self.installed) {
            if let Err(err) = feature.after_install(self, &handler) {
                warn!(feature = feature.name(), error = %err, "after install hook failed");
                errors.push(err);
            }
            self.installed.push(feature);
        }
        match errors.len() {
            0 => Ok(handler),
            1 => Err(errors.remove(0)),
            _ => Err(RuntimeError::Features(errors)),
        }
    }

    /// Builds a root context around the handler and starts every
    /// [`Bootstrap`] it provides.
    pub async fn context(&mut self) -> RuntimeResult<Context> {
        let handler = self.handler()?;
        let context = Context::new();
        context.add_handlers([handler]);
        let bootstrapper = Bootstrapper::resolve(&context, mem::take(&mut self.bootstraps)).await?;
        context.add_handlers([Arc::new(Provider::shared(bootstrapper.clone())) as BoxHandler]);
        bootstrapper.startup(&context.boxed()).await?;
        bootstrapper.attach(&context);
        info!(context = context.id(), "context started");
        Ok(context)
    }

    fn install_features(&mut self) -> Vec<RuntimeError> {
        let mut errors = Vec::new();
        let mut queue: VecDeque<_> = mem::take(&mut self.features).into();
        while let Some(feature) = queue.pop_front() {
            debug!(feature = feature.name(), "installing feature");
            if let Err(err) = feature.install(self) {
                warn!(feature = feature.name(), error = %err, "feature failed to install");
                errors.push(err);
            }
            queue.extend(feature.depends_on());
            queue.extend(mem::take(&mut self.features));
            self.installed.push(feature);
        }
        errors
    }

    fn assemble(&mut self) -> RuntimeResult<BoxHandler> {
        let factory = self.factory.clone().unwrap_or_default();
        validates::register_derived(&factory)?;

        let mut registered = 0;
        for spec in mem::take(&mut self.specs) {
            if self.excludes.iter().any(|exclude| exclude(&spec)) {
                debug!(spec = %spec.id(), "spec excluded");
                continue;
            }
            factory.register_spec(spec)?;
            registered += 1;
        }

        let mut handlers = mem::take(&mut self.handlers);
        if self.inference {
            handlers.push(Arc::new(Inference::new(factory.clone())));
        }
        handlers.push(Arc::new(Provider::new(factory.clone())));
        debug!(
            specs = registered,
            descriptors = factory.len(),
            inference = self.inference,
            "handler assembled"
        );

        let handler: BoxHandler = Arc::new(Handlers::new(handlers));
        Ok(self.layers.iter().fold(handler, |handler, layer| layer(handler)))
    }
}

/// Provides a [`ConfigProvider`] to every handler and applies its
/// `setup` section.
pub struct ConfigFeature {
    provider: Arc<ConfigProvider>,
}

impl ConfigFeature {
    pub fn new(provider: ConfigProvider) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub fn provider(&self) -> &Arc<ConfigProvider> {
        &self.provider
    }
}

impl Feature for ConfigFeature {
    fn name(&self) -> &str {
        "config"
    }

    fn install(&self, setup: &mut Setup) -> RuntimeResult<()> {
        if !setup.can_install::<ConfigFeature>() {
            return Ok(());
        }
        if self.provider.contains("setup") {
            let config: SetupConfig = self.provider.unmarshal("setup")?;
            setup.configure(&config);
        }
        setup.handlers([Arc::new(Provider::shared(self.provider.clone())) as BoxHandler]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Section};
    use crate::log::LogFeature;
    use figment::Figment;
    use figment::providers::Serialized;
    use miruken_core::prelude::*;
    use miruken_core::{IntoReply, get_options};
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq)]
    struct Receipt(String);

    impl IntoReply for Receipt {}

    struct Checkout(u32);

    #[derive(Default)]
    struct Register;

    impl Register {
        fn checkout(&self, checkout: &Checkout, prefix: Dep<String>) -> Receipt {
            Receipt(format!("{}-{}", prefix.0, checkout.0))
        }
    }

    impl Describe for Register {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.default_constructor().handles(Register::checkout)
        }
    }

    struct Recorder {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        depends: Vec<Arc<dyn Feature>>,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                journal: journal.clone(),
                depends: Vec::new(),
            }
        }

        fn depends(mut self, feature: Recorder) -> Self {
            self.depends.push(Arc::new(feature));
            self
        }
    }

    impl Feature for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn depends_on(&self) -> Vec<Arc<dyn Feature>> {
            self.depends.clone()
        }

        fn install(&self, _setup: &mut Setup) -> RuntimeResult<()> {
            self.journal.lock().push(format!("install {}", self.name));
            Ok(())
        }

        fn after_install(&self, _setup: &Setup, _handler: &BoxHandler) -> RuntimeResult<()> {
            self.journal.lock().push(format!("after {}", self.name));
            Ok(())
        }
    }

    struct Broken;

    impl Feature for Broken {
        fn install(&self, _setup: &mut Setup) -> RuntimeResult<()> {
            Err(RuntimeError::install("broken", "nothing to install"))
        }
    }

    #[test]
    fn test_specs_are_inferred() {
        let handler = Setup::default()
            .spec::<Register>()
            .with(String::from("R"))
            .handler()
            .unwrap();
        let receipt = handler.execute::<Receipt, _>(Checkout(7)).unwrap().ready().unwrap();
        assert_eq!(*receipt, Receipt("R-7".into()));
    }

    #[test]
    fn test_without_inference_specs_are_not_handlers() {
        let handler = Setup::default()
            .spec::<Register>()
            .with(String::from("R"))
            .without_inference()
            .handler()
            .unwrap();
        assert!(handler.execute::<Receipt, _>(Checkout(7)).unwrap_err().is_not_handled());
    }

    #[test]
    fn test_excluded_specs_are_skipped() {
        let handler = Setup::default()
            .spec::<Register>()
            .with(String::from("R"))
            .exclude(|spec| spec.id().short_name() == "Register")
            .handler()
            .unwrap();
        assert!(handler.execute::<Receipt, _>(Checkout(1)).is_err());
    }

    #[test]
    fn test_features_install_level_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let a = Recorder::new("a", &journal).depends(Recorder::new("c", &journal));
        let b = Recorder::new("b", &journal);
        Setup::new([Arc::new(a) as Arc<dyn Feature>, Arc::new(b)])
            .handler()
            .unwrap();
        assert_eq!(
            *journal.lock(),
            vec![
                "install a", "install b", "install c", "after a", "after b", "after c"
            ]
        );
    }

    #[test]
    fn test_feature_errors_are_collected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let Err(err) = Setup::new([
            Arc::new(Broken) as Arc<dyn Feature>,
            Arc::new(Recorder::new("ok", &journal)),
            Arc::new(Broken),
        ])
        .handler() else {
            panic!("broken features must fail the setup");
        };
        assert!(matches!(err, RuntimeError::Features(ref errors) if errors.len() == 2));
        assert_eq!(journal.lock().first().map(String::as_str), Some("install ok"));
    }

    #[test]
    fn test_can_install_once() {
        let mut setup = Setup::default();
        assert!(setup.can_install::<LogFeature>());
        assert!(!setup.can_install::<LogFeature>());
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Store {
        prefix: String,
    }

    impl Section for Store {
        const PATH: &'static str = "store";
    }

    #[derive(Default)]
    struct Till;

    impl Till {
        fn checkout(&self, checkout: &Checkout, store: Configuration<Store>) -> Receipt {
            Receipt(format!("{}-{}", store.prefix, checkout.0))
        }
    }

    impl Describe for Till {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.default_constructor().handles(Till::checkout)
        }
    }

    #[test]
    fn test_config_feature_binds_sections() {
        let figment = Figment::from(Serialized::default("store.prefix", "T"))
            .merge(Serialized::default("setup.startup_timeout_ms", 250));
        let config = ConfigFeature::new(ConfigProvider::new(figment));
        let handler = Setup::new([Arc::new(config) as Arc<dyn Feature>])
            .spec::<Till>()
            .handler()
            .unwrap();

        let receipt = handler.execute::<Receipt, _>(Checkout(3)).unwrap().ready().unwrap();
        assert_eq!(*receipt, Receipt("T-3".into()));
        let options = get_options::<SetupOptions>(&handler).unwrap();
        assert_eq!(options.startup_timeout, Some(std::time::Duration::from_millis(250)));
    }
}
