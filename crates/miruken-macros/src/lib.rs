//! Procedural macros for Miruken.
//!
//! This crate provides:
//!
//! - `#[derive(Validate)]` - Generates field validation reporting into an
//!   `Outcome` and registers it as a validator
//!
//! # Validate Derive Macro
//!
//! ```rust,ignore
//! use miruken_macros::Validate;
//!
//! #[derive(Validate)]
//! pub struct Person {
//!     #[validate(required)]
//!     pub name: String,
//!     #[validate(range(min = 18, max = 120))]
//!     pub age: u32,
//!     #[validate(required, email)]
//!     pub email: String,
//!     #[validate(nested)]
//!     pub home: Address,
//! }
//! ```

mod validate;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `miruken_core::validates::Validate`.
///
/// Errors are reported under the PascalCase form of the field name
/// (`home_phone` becomes `HomePhone`) unless `rename` overrides it.
///
/// # Field attributes
///
/// - `#[validate(required)]` - The value must be present (non-blank string,
///   `Some`, non-empty `Vec`, non-zero number)
/// - `#[validate(email)]` - A present string must look like an email address
/// - `#[validate(range(min = .., max = ..))]` - Inclusive bounds, either optional
/// - `#[validate(length(min = .., max = ..))]` - Bounds on string or `Vec` length
/// - `#[validate(nested)]` - Validates the field's own rules under its path;
///   `Vec` elements are addressed as `Field[i]`, `None` is skipped
/// - `#[validate(rename = "...")]` - Reports under another name
///
/// Non-generic types are also registered as validators, so the `Validator`
/// filter runs them once `register_derived` has been called.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Validate)]
/// pub struct Address {
///     #[validate(required)]
///     pub street: String,
///     #[validate(required, length(min = 5, max = 5))]
///     pub zip: String,
/// }
/// ```
#[proc_macro_derive(Validate, attributes(validate))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match validate::derive_validate(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
