use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authorizes::Authorizer;
use crate::constraint::{Constraint, Metadata, Named, Qualifier};
use crate::filter::FilterProvider;
use crate::foundation::Key;
use crate::lifestyle::{Scoped, Single};
use crate::validates::Validator;

/// Declaration options attached to a binding.
///
/// An anchor carries everything that is not the callable itself: the key
/// override, constraints, filters, lifestyle and free-form tags.
///
/// # Example
///
/// ```rust,ignore
/// HandlerType::<Repository>::new()
///     .provides_with(Anchor::new().named("primary").single(), Repository::connection)
///     .handles_with(Anchor::new().policy("admin").log(1), Repository::purge)
/// ```
#[derive(Clone, Default)]
pub struct Anchor {
    pub(crate) key: Option<Key>,
    pub(crate) strict: bool,
    pub(crate) skip_filters: bool,
    pub(crate) constraints: Vec<Arc<dyn Constraint>>,
    pub(crate) providers: Vec<Arc<dyn FilterProvider>>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) format: Option<Format>,
}

/// Direction of a string format on a maps binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Format {
    To(String),
    From(String),
}

impl Anchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under a name constraint.
    pub fn named(self, name: impl Into<String>) -> Self {
        self.constraint(Named::new(name))
    }

    /// Adds a metadata entry to the binding's metadata constraint.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let existing = self
            .constraints
            .iter()
            .position(|c| c.as_any().is::<Metadata>());
        let mut metadata = existing
            .and_then(|pos| self.constraints[pos].as_any().downcast_ref::<Metadata>().cloned())
            .unwrap_or_default();
        metadata.insert(key, Some(value));
        if let Some(pos) = existing {
            self.constraints.remove(pos);
        }
        self.constraint(metadata)
    }

    /// Requires the marker type `T` on the callback.
    pub fn qualifier<T: 'static>(self) -> Self {
        self.constraint(Qualifier::<T>::new())
    }

    pub fn constraint(mut self, constraint: impl Constraint) -> Self {
        self.constraints.push(Arc::new(constraint));
        self
    }

    /// One instance for the lifetime of the binding.
    pub fn single(self) -> Self {
        self.filter(Single::new())
    }

    /// One instance per context.
    pub fn scoped(self) -> Self {
        self.filter(Scoped::new())
    }

    /// One instance for the root context.
    pub fn rooted(self) -> Self {
        self.filter(Scoped::rooted())
    }

    /// Also validates the value the binding returns.
    pub fn validate_output(self) -> Self {
        self.tag("validate", "output").filter(Validator::with_output())
    }

    /// Requires the named authorization policy.
    pub fn policy(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.tag("policy", name.clone()).filter(Authorizer::policy(name))
    }

    /// Verbosity of the logging filter for this binding.
    pub fn log(self, verbosity: u8) -> Self {
        self.tag("log", verbosity.to_string())
    }

    /// Disables collection flattening.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Opts out of non-required filters.
    pub fn skip_filters(mut self) -> Self {
        self.skip_filters = true;
        self
    }

    /// Overrides the key inferred from the callable.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn filter(mut self, provider: impl FilterProvider) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn filter_arc(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Maps a source into the string format `format`.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.format_to(format)
    }

    pub fn format_to(mut self, format: impl Into<String>) -> Self {
        self.format = Some(Format::To(format.into()));
        self
    }

    /// Maps from the string format `format` into the output type.
    pub fn format_from(mut self, format: impl Into<String>) -> Self {
        self.format = Some(Format::From(format.into()));
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_accumulates() {
        let anchor = Anchor::new()
            .named("primary")
            .metadata("region", "eu")
            .metadata("tier", "gold");
        assert_eq!(anchor.constraints.len(), 2);
        let metadata = anchor
            .constraints
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<Metadata>())
            .unwrap();
        assert_eq!(metadata.get("region"), Some("eu"));
        assert_eq!(metadata.get("tier"), Some("gold"));
    }

    #[test]
    fn test_tags() {
        let anchor = Anchor::new().log(2).policy("admin").strict();
        assert_eq!(anchor.tags.get("log").map(String::as_str), Some("2"));
        assert_eq!(anchor.tags.get("policy").map(String::as_str), Some("admin"));
        assert_eq!(anchor.providers.len(), 1);
        assert!(anchor.strict);
    }
}
