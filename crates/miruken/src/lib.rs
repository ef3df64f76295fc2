//! # Miruken
//!
//! A polymorphic callback dispatch engine for Rust.
//!
//! ## Overview
//!
//! Requests, dependency lookups, mappings and validations are all callbacks
//! offered to a chain of handlers. Handlers describe their bindings once;
//! dispatch matches callbacks to bindings by key under a variance policy
//! and runs each binding through a staged filter pipeline.
//!
//! ## Crates
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐     ┌──────────────────────┐
//! │   runtime    │────▶│      core       │◀────│         api          │
//! │ setup, boot, │     │ callbacks,      │     │ send/publish, stash, │
//! │ config, logs │     │ policies,       │     │ routes, schedules    │
//! └──────────────┘     │ filters, context│     └──────────────────────┘
//!                      └─────────────────┘
//! ```
//!
//! - **Core**: dispatch, callback kinds, filters, lifestyles and contexts
//! - **Api**: message operations built on `handles`
//! - **Runtime**: [`Setup`](runtime::Setup), features, bootstrap and
//!   configuration
//! - **Macros**: `#[derive(Validate)]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use miruken::prelude::*;
//!
//! #[derive(Default)]
//! struct Quotes;
//!
//! impl Quotes {
//!     fn quote(&self, get: &GetQuote) -> Quote {
//!         Quote::new(&get.symbol, 10.0)
//!     }
//! }
//!
//! impl Describe for Quotes {
//!     fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
//!         handler.default_constructor().handles(Quotes::quote)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = Setup::new([Arc::new(ApiFeature) as Arc<dyn Feature>])
//!         .spec::<Quotes>()
//!         .handler()?;
//!     let quote = send::<Quote, _>(&handler, GetQuote::new("MSFT"))?.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use miruken_api as api;
pub use miruken_core as core;
pub use miruken_macros::Validate;
pub use miruken_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use miruken::prelude::*;
/// ```
pub mod prelude {
    // Dispatch
    pub use miruken_core::prelude::*;
    pub use miruken_core::{Filter, FilterProvider, HandleContext, Next, Provides};

    // Validation
    pub use miruken_core::validates::Validator;
    pub use miruken_macros::Validate;

    // Messaging
    pub use miruken_api::prelude::*;

    // Assembly
    pub use miruken_runtime::{
        Bootstrap, ConfigFeature, ConfigLoader, Configuration, Feature, LogFeature, RuntimeError,
        RuntimeResult, Section, Setup,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, Validate)]
    struct Address {
        #[validate(required)]
        street: String,
        #[validate(required, length(min = 5, max = 5))]
        zip: String,
    }

    #[derive(Debug, Default, Validate)]
    struct CreateUser {
        #[validate(required)]
        name: String,
        #[validate(required, range(min = 18, max = 120))]
        age: u32,
        #[validate(required, email)]
        email: String,
        #[validate(required)]
        password: String,
        #[validate(nested)]
        home: Address,
        #[validate(nested)]
        work: Vec<Address>,
    }

    #[derive(Default)]
    struct Users {
        created: AtomicUsize,
    }

    impl Users {
        fn create(&self, _create: &CreateUser) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Describe for Users {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles(Users::create)
        }
    }

    fn setup() -> (Arc<Users>, BoxHandler) {
        let users = Arc::new(Users::default());
        let handler = Setup::new([Arc::new(ApiFeature) as Arc<dyn Feature>])
            .handlers([Instance::shared(users.clone()).unwrap().boxed()])
            .filters([Arc::new(Validator::new()) as Arc<dyn FilterProvider>])
            .handler()
            .unwrap();
        (users, handler)
    }

    fn address() -> Address {
        Address {
            street: "Main St".into(),
            zip: "75001".into(),
        }
    }

    #[tokio::test]
    async fn test_invalid_command_reports_every_field() {
        let (users, handler) = setup();
        let user = CreateUser {
            email: "john".into(),
            work: vec![Address::default()],
            ..CreateUser::default()
        };
        let err = match post(&handler, user) {
            Err(err) => err,
            Ok(posted) => posted.await.unwrap_err(),
        };
        let outcome = err.outcome().unwrap();
        assert_eq!(
            outcome.paths(),
            [
                "Age",
                "Email",
                "Home.Street",
                "Home.Zip",
                "Name",
                "Password",
                "Work[0].Street",
                "Work[0].Zip"
            ]
        );
        assert_eq!(users.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_command_reaches_the_handler() {
        let (users, handler) = setup();
        let user = CreateUser {
            name: "John".into(),
            age: 30,
            email: "john@example.com".into(),
            password: "secret".into(),
            home: address(),
            work: vec![address()],
        };
        post(&handler, user).unwrap().await.unwrap();
        assert_eq!(users.created.load(Ordering::SeqCst), 1);
    }
}
