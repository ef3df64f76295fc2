//! Adapters from Rust callables to binding invokers.
//!
//! Like the handler traits of an HTTP router, these traits are implemented
//! for functions of every arity up to eight, as long as every parameter after
//! the receiver and the callback source implements [`FromDispatch`]:
//!
//! ```rust,ignore
//! impl Quotes {
//!     // SourceMethod<Quotes, GetQuote, (Dep<Exchange>,)>
//!     fn quote(&self, req: &GetQuote, exchange: Dep<Exchange>) -> Result<Quote> { ... }
//!
//!     // ProviderMethod<Quotes, ()>
//!     fn exchange(&self) -> Exchange { ... }
//! }
//!
//! // Constructor<Quotes, (Dep<Exchange>,)>
//! fn new_quotes(exchange: Dep<Exchange>) -> Quotes { ... }
//! ```
//!
//! When any argument resolves to a pending value the call is scheduled to
//! run once every argument is available and the binding returns
//! [`Output::Pending`].

use std::sync::Arc;

use crate::error::Result;
use crate::foundation::Deferred;
use crate::handle_context::HandleContext;

use super::{ArgPlan, FromDispatch, IntoReply, Invoker, Output, Reply};

// ============================================================================
// Traits
// ============================================================================

/// A method taking the receiver and the callback source.
pub trait SourceMethod<H, M, Args>: Send + Sync + Sized + 'static {
    type Output: IntoReply;

    fn plan() -> ArgPlan;

    fn into_invoker(self, strict: bool) -> Invoker;
}

/// A method taking only the receiver.
pub trait ProviderMethod<H, Args>: Send + Sync + Sized + 'static {
    type Output: IntoReply;

    fn plan() -> ArgPlan;

    fn into_invoker(self, strict: bool) -> Invoker;
}

/// A free function taking the callback source.
pub trait SourceFn<M, Args>: Send + Sync + Sized + 'static {
    type Output: IntoReply;

    fn plan() -> ArgPlan;

    fn into_invoker(self, strict: bool) -> Invoker;
}

/// A free function with resolved arguments only.
pub trait ProviderFn<Args>: Send + Sync + Sized + 'static {
    type Output: IntoReply;

    fn plan() -> ArgPlan;

    fn into_invoker(self, strict: bool) -> Invoker;
}

/// Builds a handler instance.
pub trait Constructor<H, Args>: Send + Sync + Sized + 'static {
    fn plan() -> ArgPlan;

    fn into_invoker(self) -> Invoker;
}

/// Builds a handler instance or fails.
pub trait TryConstructor<H, Args>: Send + Sync + Sized + 'static {
    fn plan() -> ArgPlan;

    fn into_invoker(self) -> Invoker;
}

// ============================================================================
// Invocation
// ============================================================================

/// Resolves every argument, then evaluates `$call` now or once the pending
/// arguments complete.
macro_rules! call_with_args {
    ($ctx:ident, $strict:expr, [$($ty:ident),*], $call:expr) => {{
        let mut index = 0usize;
        $(
            let $ty = $ty::from_dispatch($ctx, index)?;
            index += 1;
        )*
        if !(false $(|| $ty.is_pending())*) {
            $( let $ty = $ty.into_value()?; )*
            IntoReply::into_output($call, $strict)
        } else {
            Ok(Output::Pending(Deferred::from_future(async move {
                $( let $ty = $ty.resolve().await?; )*
                IntoReply::into_output($call, $strict)?.into_deferred().await
            })))
        }
    }};
}

macro_rules! impl_method {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, H, M, R, $($ty,)*> SourceMethod<H, M, ($($ty,)*)> for F
        where
            F: Fn(&H, &M, $($ty,)*) -> R + Send + Sync + 'static,
            H: Send + Sync + 'static,
            M: Send + Sync + 'static,
            R: IntoReply,
            $( $ty: FromDispatch, )*
        {
            type Output = R;

            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self, strict: bool) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    let receiver = ctx.receiver_as::<H>()?;
                    let source = ctx.source_as::<M>()?;
                    call_with_args!(ctx, strict, [$($ty),*], (f)(&receiver, &source, $($ty,)*))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, H, R, $($ty,)*> ProviderMethod<H, ($($ty,)*)> for F
        where
            F: Fn(&H, $($ty,)*) -> R + Send + Sync + 'static,
            H: Send + Sync + 'static,
            R: IntoReply,
            $( $ty: FromDispatch, )*
        {
            type Output = R;

            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self, strict: bool) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    let receiver = ctx.receiver_as::<H>()?;
                    call_with_args!(ctx, strict, [$($ty),*], (f)(&receiver, $($ty,)*))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, M, R, $($ty,)*> SourceFn<M, ($($ty,)*)> for F
        where
            F: Fn(&M, $($ty,)*) -> R + Send + Sync + 'static,
            M: Send + Sync + 'static,
            R: IntoReply,
            $( $ty: FromDispatch, )*
        {
            type Output = R;

            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self, strict: bool) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    let source = ctx.source_as::<M>()?;
                    call_with_args!(ctx, strict, [$($ty),*], (f)(&source, $($ty,)*))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, R, $($ty,)*> ProviderFn<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $( $ty: FromDispatch, )*
        {
            type Output = R;

            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self, strict: bool) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    call_with_args!(ctx, strict, [$($ty),*], (f)($($ty,)*))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, H, $($ty,)*> Constructor<H, ($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> H + Send + Sync + 'static,
            H: Send + Sync + 'static,
            $( $ty: FromDispatch, )*
        {
            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    call_with_args!(ctx, true, [$($ty),*], Reply::value((f)($($ty,)*)))
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, H, $($ty,)*> TryConstructor<H, ($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Result<H> + Send + Sync + 'static,
            H: Send + Sync + 'static,
            $( $ty: FromDispatch, )*
        {
            fn plan() -> ArgPlan {
                ArgPlan::new(vec![$( $ty::spec(), )*])
            }

            fn into_invoker(self) -> Invoker {
                let f = Arc::new(self);
                Arc::new(move |ctx: &HandleContext| -> Result<Output> {
                    let f = f.clone();
                    call_with_args!(ctx, true, [$($ty),*], (f)($($ty,)*).map(Reply::value))
                })
            }
        }
    };
}

// Generate implementations for 0-8 resolved parameters
impl_method!();
impl_method!(T1);
impl_method!(T1, T2);
impl_method!(T1, T2, T3);
impl_method!(T1, T2, T3, T4);
impl_method!(T1, T2, T3, T4, T5);
impl_method!(T1, T2, T3, T4, T5, T6);
impl_method!(T1, T2, T3, T4, T5, T6, T7);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8);
