//! Configuration loader using figment.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Profile-specific file (`miruken.{profile}.toml` / `miruken.{profile}.yaml`)
//! 3. Main file (`miruken.toml` / `miruken.yaml`)
//! 4. Environment variables (`MIRUKEN_*`)
//! 5. Programmatic overrides given to [`ConfigLoader::merge`] and [`ConfigLoader::set`]
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML files
//! - `yaml-config`: YAML files (`miruken.yaml`, `miruken.yml`)
//!
//! # Environment Variable Mapping
//!
//! Variables use the `MIRUKEN_` prefix with `__` separating nested keys:
//!
//! - `MIRUKEN_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `MIRUKEN_SETUP__STARTUP_TIMEOUT_MS=5000` → `setup.startup_timeout_ms = 5000`
//! - `MIRUKEN_DATABASE__URL=...` → `database.url`, readable through a
//!   [`ConfigProvider`]
//!
//! # Example
//!
//! ```rust,ignore
//! use miruken_runtime::config::ConfigLoader;
//!
//! let loader = ConfigLoader::new().profile("production");
//! let provider = loader.provider()?;
//! let config = provider.config()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::provider::ConfigProvider;
use super::schema::MirukenConfig;

const ENV_PREFIX: &str = "MIRUKEN_";
const PROFILE_VAR: &str = "MIRUKEN_PROFILE";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the short forms `dev` and `prod`.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `MIRUKEN_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the layered [`Figment`] behind a [`ConfigProvider`].
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory searched for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/miruken` to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("miruken")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges programmatic values; any `Serialize` type works, including
    /// sections the schema does not know about.
    pub fn merge<T: serde::Serialize>(mut self, values: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(values));
        self
    }

    /// Sets a single value at a dotted `key`.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads and validates the root configuration.
    pub fn load(self) -> ConfigResult<MirukenConfig> {
        self.provider()?.config()
    }

    /// Builds a provider over every source.
    pub fn provider(self) -> ConfigResult<ConfigProvider> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;
        debug!(profile = %profile, "configuration sources layered");
        Ok(ConfigProvider::new(figment))
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(MirukenConfig::default()));

        figment = match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading configuration file");
                Self::merge_config_file(figment, path)?
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => self.load_config_files(figment),
        };

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("miruken"));
        }
        paths
    }

    /// Searches `search_paths` for `base_names`; a profile variant is merged
    /// before its base file. Stops at the first directory holding a base file.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };
                let profile_path = search_path.join(format!("{stem}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "loading profile configuration");
                    figment = merge_fn(figment, &profile_path);
                }
                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_mut)
    )]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(figment, &search_paths, &["miruken.toml"], |fig, path| {
                fig.merge(Toml::file(path))
            });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["miruken.yaml", "miruken.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("no configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the root configuration from the default locations.
pub fn load_config() -> ConfigResult<MirukenConfig> {
    ConfigLoader::new().load()
}

/// Loads the root configuration from exactly `path`.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<MirukenConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogFormat, LogLevel};
    use figment::Jail;

    #[test]
    fn test_default_config() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new().without_env().load().map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Info);
            assert!(config.setup.inference);
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_VAR, "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env(PROFILE_VAR, "staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".into()));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_layering_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "miruken.toml",
                r#"
                [logging]
                level = "warn"
                format = "pretty"
                "#,
            )?;
            jail.create_file(
                "miruken.staging.toml",
                r#"
                [logging]
                level = "error"
                verbosity = 2
                "#,
            )?;
            jail.set_env("MIRUKEN_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .profile("staging")
                .load()
                .map_err(|e| e.to_string())?;
            // env beats the main file, which beats the profile file
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.logging.format, LogFormat::Pretty);
            assert_eq!(config.logging.verbosity, 2);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new().file("does/not/exist.toml").load().unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("miruken.ini", "level = debug")?;
            let err = ConfigLoader::new().file("miruken.ini").load().unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "ini"));
            Ok(())
        });
    }
}
