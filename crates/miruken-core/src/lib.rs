//! # Miruken Core
//!
//! A polymorphic callback dispatch engine.
//!
//! A callback (a command, a dependency request, a mapping, a validation)
//! is offered to a chain of handlers. Each handler is described once by a
//! descriptor that indexes its bindings by policy and key; dispatch picks
//! the bindings whose keys match under the policy's variance, runs each
//! through its filter pipeline and feeds the results back into the
//! callback.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Deferred values** ([`Deferred`]): shared, cancelable results
//! - **Traversal** ([`foundation::graph`]): tree walks with cycle detection
//! - **Keys** ([`Key`], [`TypeKey`], [`Payload`]) and declared subtyping
//!   ([`foundation::lineage`])
//!
//! ### Dispatch
//!
//! - **Policies** ([`policy`]): covariant, contravariant and bivariant
//!   matching plus binding order
//! - **Bindings** ([`binding`]): callables, argument resolution, anchors
//! - **Descriptors** ([`descriptor`]): per-type binding indexes, cached by
//!   [`DescriptorFactory`]
//! - **Filters** ([`filter`]): staged pipelines around every binding
//! - **Handlers** ([`handler`]): instances, composites, layers and the
//!   typed operations of [`HandlerExt`]
//!
//! ### Callbacks
//!
//! [`Handles`], [`Provides`], [`Creates`], [`Maps`], [`Validates`],
//! [`Authorizes`] and batches ([`batch`]), with effects ([`effect`]),
//! lifestyles ([`lifestyle`]) and the [`Context`] tree.
//!
//! ## Example
//!
//! ```rust,ignore
//! use miruken_core::prelude::*;
//!
//! #[derive(Default)]
//! struct Orders;
//!
//! struct PlaceOrder(u32);
//!
//! impl Orders {
//!     fn place(&self, order: &PlaceOrder) -> String {
//!         format!("order {}", order.0)
//!     }
//! }
//!
//! impl Describe for Orders {
//!     fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
//!         handler.default_constructor().handles(Orders::place)
//!     }
//! }
//!
//! let handler = Instance::of(Orders)?.boxed();
//! let reply: Arc<String> = handler.execute(PlaceOrder(7))?.await?;
//! ```

pub mod authorizes;
pub mod batch;
pub mod binding;
pub mod callback;
pub mod constraint;
pub mod context;
pub mod creates;
pub mod descriptor;
pub mod effect;
pub mod error;
pub mod filter;
pub mod foundation;
pub mod handle_context;
pub mod handle_result;
pub mod handler;
pub mod handles;
pub mod inference;
pub mod lifestyle;
pub mod maps;
pub mod options;
pub mod policy;
pub mod provides;
pub mod validates;

pub use linkme;

// Re-export foundation types
pub use foundation::{Deferred, Key, Payload, Resolver, TypeKey};

// Re-export dispatch types
pub use binding::{
    All, Anchor, Binding, BindingKind, Dep, FromDispatch, IntoReply, Keyed, Named, Output, Reply,
    Source,
};
pub use callback::{Callback, CallbackRef, Composition, Received, Resolution};
pub use descriptor::{Describe, DescriptorFactory, HandlerDescriptor, HandlerSpec, HandlerType};
pub use error::{Error, Result};
pub use filter::{Filter, FilterOptions, FilterProvider, Next};
pub use handle_context::HandleContext;
pub use handle_result::HandleResult;
pub use handler::{
    BoxHandler, Handler, HandlerExt, HandlerFn, Handlers, Instance, IntoBoxHandler,
    MutableHandlers, Provider, WithHandler, dispatch,
};
pub use inference::Inference;
pub use options::{Merge, Options, WithOptions, get_options};

// Re-export callback kinds
pub use authorizes::{Authorizer, Authorizes, Principal, Subject};
pub use batch::{Batch, Batching, NoBatch};
pub use context::{Context, ContextObserver, ContextState, EndReason};
pub use creates::Creates;
pub use effect::Effect;
pub use handles::Handles;
pub use lifestyle::{Scoped, Single};
pub use maps::Maps;
pub use provides::{Provides, Resolves};
pub use validates::{Outcome, Validate, Validates, Validator};

/// Everything needed to describe handlers and dispatch to them.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        Anchor, BoxHandler, Context, Deferred, Describe, Error, Handler, HandlerExt, HandlerSpec,
        HandlerType, Inference, Instance, IntoBoxHandler, IntoReply, Key, Outcome, Payload,
        Resolution, Result, Subject,
    };
    pub use crate::binding::{All, Dep, Source};
    pub use crate::handler::{FilterLayer, OptionsLayer, SuppressFilters, WithHandlers, WithValues};
}
