//! # Miruken API
//!
//! Messaging on top of `miruken-core`:
//!
//! - [`send`], [`post`] and [`publish`] with a per-message [`Stash`]
//! - [`Either`] results and [`ScheduledResult`] batches run by the
//!   [`Scheduler`]
//! - Routing with [`route_to`], the [`Routes`] filter and batched routes
//! - Follow-up messages as effects ([`cascade`])
//!
//! [`ApiFeature`] installs the handlers this crate needs.
//!
//! ```rust,ignore
//! use miruken_api::prelude::*;
//!
//! let handler = Setup::new([Arc::new(ApiFeature) as Arc<dyn Feature>])
//!     .spec::<Quotes>()
//!     .handler()?;
//! let quote = send::<Quote, _>(&handler, GetQuote::new("MSFT"))?.await?;
//! let responses = concurrent(&handler, [Payload::new(GetQuote::new("IBM"))])?.await?;
//! ```

pub mod cascade;
pub mod either;
pub mod error;
pub mod feature;
pub mod message;
pub mod route;
pub mod schedule;
pub mod stash;

pub use either::Either;
pub use error::{ApiError, ApiResult};
pub use feature::ApiFeature;
pub use message::{notify, post, post_payload, publish, publish_payload, send, send_payload};
pub use route::{
    PASS_THROUGH, PassThroughRouter, RouteBatcher, RouteReply, Routed, Routes, RoutesAnchor,
    route_payload, route_to,
};
pub use schedule::{
    ConcurrentBatch, Published, Response, ScheduledResult, Scheduler, SequentialBatch, concurrent,
    sequential,
};
pub use stash::{
    Stash, StashRequest, stash_drop, stash_drop_key, stash_get, stash_get_key, stash_get_or_put,
    stash_hide, stash_put, stash_put_key, stash_put_shared,
};

/// Messaging operations and the types they work with.
pub mod prelude {
    pub use crate::{
        ApiFeature, ConcurrentBatch, Either, Routed, RoutesAnchor, ScheduledResult,
        SequentialBatch, concurrent, notify, post, publish, route_to, send, sequential,
        stash_get, stash_put,
    };
}
