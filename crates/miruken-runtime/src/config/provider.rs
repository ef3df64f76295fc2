//! Configuration sections as dispatch arguments.
//!
//! A [`ConfigProvider`] wraps a loaded [`Figment`]. Installed in the
//! handler chain (see [`ConfigFeature`](crate::ConfigFeature)), it lets any
//! binding take a [`Configuration<T>`] parameter bound from the section at
//! `T::PATH`:
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct Database { url: String, pool: u32 }
//!
//! impl Section for Database {
//!     const PATH: &'static str = "database";
//! }
//!
//! impl Repository {
//!     fn new(db: Configuration<Database>) -> Self { ... }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use figment::Figment;
use futures::FutureExt;
use miruken_core::binding::{Arg, ArgKind, ArgSpec};
use miruken_core::{Error, FromDispatch, HandleContext, Payload, Provides, Resolution};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::MirukenConfig;
use super::validation::validate_config;

type Cached = Arc<dyn Any + Send + Sync>;

/// Reads typed values out of layered configuration.
pub struct ConfigProvider {
    figment: Figment,
    sections: RwLock<HashMap<(TypeId, &'static str), Cached>>,
}

impl ConfigProvider {
    pub fn new(figment: Figment) -> Self {
        Self {
            figment,
            sections: RwLock::new(HashMap::new()),
        }
    }

    pub fn figment(&self) -> &Figment {
        &self.figment
    }

    /// True when a value exists at the dotted `path`.
    pub fn contains(&self, path: &str) -> bool {
        path.is_empty() || self.figment.contains(path)
    }

    /// Deserializes the value at `path`; an empty path reads the root.
    pub fn unmarshal<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<T> {
        let value = if path.is_empty() {
            self.figment.extract()
        } else {
            self.figment.extract_inner(path)
        };
        value.map_err(|err| ConfigError::section(path, err))
    }

    /// The validated root configuration.
    pub fn config(&self) -> ConfigResult<MirukenConfig> {
        let config: MirukenConfig = self.figment.extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// The section `T`, read and validated once per provider.
    pub fn section<T: Section>(&self) -> ConfigResult<Arc<T>> {
        let key = (TypeId::of::<T>(), T::PATH);
        if let Some(cached) = self.sections.read().get(&key).cloned()
            && let Ok(section) = cached.downcast::<T>()
        {
            trace!(path = T::PATH, "configuration section cache hit");
            return Ok(section);
        }

        let section: T = self.unmarshal(T::PATH)?;
        section.validate()?;
        let section = Arc::new(section);
        debug!(path = T::PATH, section = std::any::type_name::<T>(), "configuration section bound");
        self.sections.write().insert(key, section.clone());
        Ok(section)
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("sections", &self.sections.read().len())
            .finish()
    }
}

/// A typed configuration section.
pub trait Section: DeserializeOwned + Send + Sync + 'static {
    /// Dotted path of the section; empty for the root.
    const PATH: &'static str;

    /// Checks the section once it is read.
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

impl Section for MirukenConfig {
    const PATH: &'static str = "";

    fn validate(&self) -> ConfigResult<()> {
        validate_config(self)
    }
}

/// Handler parameter bound from the configuration section `T`.
///
/// Unresolved when no provider is installed or nothing exists at
/// `T::PATH`, so `Option<Configuration<T>>` makes the section optional.
pub struct Configuration<T>(pub Arc<T>);

impl<T> Clone for Configuration<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Configuration<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

fn unresolved<T>(index: usize, reason: &str) -> Error {
    Error::UnresolvedArg {
        index,
        type_name: std::any::type_name::<T>(),
        reason: reason.to_string(),
    }
}

fn bind<T: Section>(provider: Option<Payload>, index: usize) -> miruken_core::Result<Configuration<T>> {
    let provider = provider
        .and_then(|p| p.cast::<ConfigProvider>())
        .ok_or_else(|| unresolved::<T>(index, "no configuration provider"))?;
    if !provider.contains(T::PATH) {
        return Err(unresolved::<T>(index, "no configuration at path"));
    }
    provider
        .section::<T>()
        .map(Configuration)
        .map_err(|err| Error::custom(format!("config: {err}")))
}

impl<T: Section> FromDispatch for Configuration<T> {
    fn spec() -> ArgSpec {
        ArgSpec::new::<T>(ArgKind::Configuration)
    }

    fn from_dispatch(ctx: &HandleContext, index: usize) -> miruken_core::Result<Arg<Self>> {
        match Arc::new(Provides::of::<ConfigProvider>().build()).resolve(ctx.composer())? {
            Resolution::Ready(provider) => bind::<T>(provider, index).map(Arg::Ready),
            Resolution::Pending(pending) => Ok(Arg::Pending(
                async move { bind::<T>(pending.await?, index) }.boxed(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Database {
        url: String,
        pool: u32,
    }

    impl Section for Database {
        const PATH: &'static str = "services.database";

        fn validate(&self) -> ConfigResult<()> {
            if self.pool == 0 {
                return Err(ConfigError::validation("pool must be positive"));
            }
            Ok(())
        }
    }

    fn provider(pool: u32) -> ConfigProvider {
        let database = Database {
            url: "postgres://localhost/app".into(),
            pool,
        };
        ConfigProvider::new(Figment::from(Serialized::default("services.database", database)))
    }

    #[test]
    fn test_unmarshal_path() {
        let provider = provider(4);
        let url: String = provider.unmarshal("services.database.url").unwrap();
        assert_eq!(url, "postgres://localhost/app");
        assert!(provider.unmarshal::<u32>("services.cache.size").is_err());
    }

    #[test]
    fn test_sections_are_cached() {
        let provider = provider(4);
        let first = provider.section::<Database>().unwrap();
        let second = provider.section::<Database>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.pool, 4);
    }

    #[test]
    fn test_section_validation() {
        let err = provider(0).section::<Database>().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_root_section() {
        let provider = ConfigProvider::new(Figment::from(Serialized::defaults(MirukenConfig::default())));
        assert!(provider.contains(MirukenConfig::PATH));
        assert_eq!(*provider.section::<MirukenConfig>().unwrap(), MirukenConfig::default());
    }
}
