//! Building blocks shared by the dispatch engine: keys and lineage,
//! deferred values and graph traversal.

pub mod deferred;
pub mod graph;
pub mod key;
pub mod lineage;

pub use deferred::{Deferred, Resolver};
pub use graph::{TraversalAxis, Traversing, Visit, level_order, post_order, pre_order, reverse_level_order, traverse};
pub use key::{Key, Payload, TypeKey, Value};
