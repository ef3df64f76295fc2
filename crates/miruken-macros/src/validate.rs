//! Validate derive macro implementation.
//!
//! # Overview
//!
//! `#[derive(Validate)]` generates:
//!
//! 1. `impl Validate` - one check per field rule, reporting into the outcome
//!    under the field's path
//! 2. a `DERIVED_VALIDATORS` entry - a `linkme` distributed slice element
//!    producing the validator spec of the type (non-generic types only)
//!
//! # Field-level attributes `#[validate(...)]`
//!
//! | Key | Example | Description |
//! |-----|---------|-------------|
//! | `required` | `required` | Value must be present |
//! | `email` | `email` | Present string must be an email address |
//! | `range` | `range(min = 18, max = 120)` | Inclusive value bounds |
//! | `length` | `length(min = 8)` | Inclusive length bounds |
//! | `nested` | `nested` | Run the field type's own rules |
//! | `rename` | `rename = "EMail"` | Path segment used in the outcome |

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Expr, Field, Fields, GenericArgument, Ident, LitInt, LitStr,
    PathArguments, Type, spanned::Spanned,
};

// ============================================================================
// Attribute structures
// ============================================================================

/// Per-field `#[validate(…)]` rules.
#[derive(Default)]
struct FieldRules {
    rename: Option<String>,
    required: bool,
    email: bool,
    range: Option<(Option<Expr>, Option<Expr>)>,
    length: Option<(Option<LitInt>, Option<LitInt>)>,
    nested: bool,
}

impl FieldRules {
    fn is_empty(&self) -> bool {
        !self.required && !self.email && self.range.is_none() && self.length.is_none() && !self.nested
    }
}

/// How the field type wraps the validated value.
enum Shape {
    Plain,
    Option,
    Vec,
}

// ============================================================================
// Entry point
// ============================================================================

pub fn derive_validate(input: &DeriveInput) -> syn::Result<TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new(
                    input.span(),
                    "Validate requires named fields to report errors by name",
                ));
            }
        },
        Data::Enum(_) => {
            return Err(syn::Error::new(input.span(), "Validate does not support enums"));
        }
        Data::Union(_) => {
            return Err(syn::Error::new(input.span(), "Validate cannot be derived for unions"));
        }
    };

    let mut checks = Vec::new();
    for field in fields {
        let rules = parse_field_rules(&field.attrs)?;
        if rules.is_empty() {
            continue;
        }
        checks.push(generate_checks(field, &rules)?);
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let registration = if input.generics.params.is_empty() {
        let static_name = Ident::new(
            &format!("_VALIDATE_REGISTER_{}", name.to_string().to_uppercase()),
            Span::call_site(),
        );
        quote! {
            #[::miruken_core::linkme::distributed_slice(::miruken_core::validates::DERIVED_VALIDATORS)]
            #[linkme(crate = ::miruken_core::linkme)]
            static #static_name: fn() -> ::miruken_core::HandlerSpec =
                ::miruken_core::validates::derived::<#name>;
        }
    } else {
        TokenStream::new()
    };

    Ok(quote! {
        impl #impl_generics ::miruken_core::validates::Validate for #name #ty_generics #where_clause {
            fn validate(&self, outcome: &mut ::miruken_core::validates::Outcome) {
                #(#checks)*
            }
        }

        #registration
    })
}

// ============================================================================
// Attribute parsing
// ============================================================================

fn parse_field_rules(attrs: &[Attribute]) -> syn::Result<FieldRules> {
    let mut rules = FieldRules::default();
    for attr in attrs {
        if !attr.path().is_ident("validate") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("required") {
                rules.required = true;
            } else if meta.path.is_ident("email") {
                rules.email = true;
            } else if meta.path.is_ident("nested") {
                rules.nested = true;
            } else if meta.path.is_ident("rename") {
                rules.rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("range") {
                let (mut min, mut max) = (None, None);
                meta.parse_nested_meta(|bound| {
                    if bound.path.is_ident("min") {
                        min = Some(bound.value()?.parse::<Expr>()?);
                    } else if bound.path.is_ident("max") {
                        max = Some(bound.value()?.parse::<Expr>()?);
                    } else {
                        return Err(bound.error("expected `min` or `max`"));
                    }
                    Ok(())
                })?;
                rules.range = Some((min, max));
            } else if meta.path.is_ident("length") {
                let (mut min, mut max) = (None, None);
                meta.parse_nested_meta(|bound| {
                    if bound.path.is_ident("min") {
                        min = Some(bound.value()?.parse::<LitInt>()?);
                    } else if bound.path.is_ident("max") {
                        max = Some(bound.value()?.parse::<LitInt>()?);
                    } else {
                        return Err(bound.error("expected `min` or `max`"));
                    }
                    Ok(())
                })?;
                rules.length = Some((min, max));
            } else {
                return Err(meta.error(
                    "unknown rule, expected one of: required, email, range, length, nested, rename",
                ));
            }
            Ok(())
        })?;
    }
    Ok(rules)
}

// ============================================================================
// Code generation
// ============================================================================

fn generate_checks(field: &Field, rules: &FieldRules) -> syn::Result<TokenStream> {
    let ident = field
        .ident
        .as_ref()
        .ok_or_else(|| syn::Error::new(field.span(), "Validate requires named fields"))?;
    let path = rules
        .rename
        .clone()
        .unwrap_or_else(|| pascal_case(&ident.to_string()));
    let shape = shape_of(&field.ty);
    let rules_path = quote!(::miruken_core::validates::rules);

    let mut checks = Vec::new();

    if rules.required {
        checks.push(quote! {
            if !#rules_path::Presence::is_present(&self.#ident) {
                outcome.add_error(#path, #rules_path::REQUIRED);
            }
        });
    }

    if rules.email {
        checks.push(each_present(&shape, ident, quote! {
            if #rules_path::Presence::is_present(&::std::convert::AsRef::<str>::as_ref(value))
                && !#rules_path::is_email(::std::convert::AsRef::<str>::as_ref(value))
            {
                outcome.add_error(#path, #rules_path::INVALID_EMAIL);
            }
        }));
    }

    if let Some((min, max)) = &rules.range {
        let min = optional(min.as_ref().map(|e| quote!(#e)));
        let max = optional(max.as_ref().map(|e| quote!(#e)));
        checks.push(each_present(&shape, ident, quote! {
            if let ::std::option::Option::Some(message) = #rules_path::range(value, #min, #max) {
                outcome.add_error(#path, message);
            }
        }));
    }

    if let Some((min, max)) = &rules.length {
        let min = optional(min.as_ref().map(|l| quote!(#l)));
        let max = optional(max.as_ref().map(|l| quote!(#l)));
        let check = quote! {
            if let ::std::option::Option::Some(message) = #rules_path::length(value, #min, #max) {
                outcome.add_error(#path, message);
            }
        };
        // A Vec's own length is checked, not its elements'.
        checks.push(match shape {
            Shape::Vec => quote! {
                {
                    let value = &self.#ident;
                    #check
                }
            },
            _ => each_present(&shape, ident, check),
        });
    }

    if rules.nested {
        checks.push(match shape {
            Shape::Plain => quote! {
                ::miruken_core::validates::Validate::validate(&self.#ident, outcome.require_path(#path));
            },
            Shape::Option => quote! {
                if let ::std::option::Option::Some(value) = &self.#ident {
                    ::miruken_core::validates::Validate::validate(value, outcome.require_path(#path));
                }
            },
            Shape::Vec => quote! {
                for (index, value) in self.#ident.iter().enumerate() {
                    let path = ::std::format!("{}[{}]", #path, index);
                    ::miruken_core::validates::Validate::validate(value, outcome.require_path(&path));
                }
            },
        });
    }

    Ok(quote! { #(#checks)* })
}

/// Runs `check` with `value` bound to the field, or to its content when the
/// field is an `Option`.
fn each_present(shape: &Shape, ident: &Ident, check: TokenStream) -> TokenStream {
    match shape {
        Shape::Option => quote! {
            if let ::std::option::Option::Some(value) = &self.#ident {
                #check
            }
        },
        _ => quote! {
            {
                let value = &self.#ident;
                #check
            }
        },
    }
}

fn optional(bound: Option<TokenStream>) -> TokenStream {
    match bound {
        Some(bound) => quote!(::std::option::Option::Some(#bound)),
        None => quote!(::std::option::Option::None),
    }
}

fn shape_of(ty: &Type) -> Shape {
    let Type::Path(path) = ty else {
        return Shape::Plain;
    };
    let Some(last) = path.path.segments.last() else {
        return Shape::Plain;
    };
    let has_argument = matches!(
        &last.arguments,
        PathArguments::AngleBracketed(args)
            if args.args.iter().any(|a| matches!(a, GenericArgument::Type(_)))
    );
    match last.ident.to_string().as_str() {
        "Option" if has_argument => Shape::Option,
        "Vec" if has_argument => Shape::Vec,
        _ => Shape::Plain,
    }
}

/// `home_phone` → `HomePhone`.
fn pascal_case(name: &str) -> String {
    name.trim_start_matches("r#")
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
