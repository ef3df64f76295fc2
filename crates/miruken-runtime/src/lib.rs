//! Miruken Runtime - application assembly on top of `miruken-core`.
//!
//! This crate provides:
//! - [`Setup`] and [`Feature`]s for building the root handler
//! - [`Bootstrap`] startup and shutdown bound to the root context
//! - Layered configuration ([`config`]) and configuration sections as
//!   handler parameters ([`Configuration`])
//! - Tracing subscriber setup ([`logging`]) and the dispatch logging
//!   filter ([`LogProvider`])
//!
//! ```ignore
//! use miruken_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RuntimeError> {
//!     let provider = ConfigLoader::new().with_current_dir().provider()?;
//!     logging::init_from_config(&provider.config()?.logging);
//!
//!     let context = Setup::new([
//!         Arc::new(ConfigFeature::new(provider)) as Arc<dyn Feature>,
//!         Arc::new(LogFeature::new(0)),
//!     ])
//!     .spec::<Orders>()
//!     .context()
//!     .await?;
//!
//!     bootstrap::run(&context).await
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod log;
pub mod logging;
pub mod setup;

pub use bootstrap::{Bootstrap, Bootstrapper, SetupOptions};
pub use config::{
    ConfigError, ConfigLoader, ConfigProvider, ConfigResult, Configuration, MirukenConfig,
    Section,
};
pub use error::{RuntimeError, RuntimeResult};
pub use log::{LogFeature, LogFilter, LogProvider};
pub use logging::{LoggingBuilder, SpanEvents};
pub use setup::{ConfigFeature, Feature, Setup};

pub use tracing;
pub use tracing_subscriber;

/// Types needed to assemble and run an application, plus the tracing
/// macros.
pub mod prelude {
    pub use std::sync::Arc;

    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};

    pub use crate::{
        Bootstrap, ConfigFeature, ConfigLoader, Configuration, Feature, LogFeature, RuntimeError,
        RuntimeResult, Section, Setup, bootstrap, logging,
    };
}
