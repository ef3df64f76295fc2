//! Configuration for Miruken applications.
//!
//! Layered loading through figment ([`ConfigLoader`]), the root schema
//! ([`MirukenConfig`]) and typed sections bound into handler parameters
//! ([`ConfigProvider`], [`Configuration`]).

pub mod error;
pub mod loader;
pub mod provider;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use provider::{ConfigProvider, Configuration, Section};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, MirukenConfig, SetupConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
