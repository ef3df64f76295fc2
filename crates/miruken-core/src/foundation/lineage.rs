//! Explicit subtype declarations between Rust types.
//!
//! Rust has no structural subtyping between concrete types, so variance is
//! driven by a process-wide registry. A declaration states that every
//! `Child` can be viewed as a `Parent` through an upcast function:
//!
//! ```rust,ignore
//! lineage::declare::<CreateUser, Command>(|cmd| Command::from(cmd));
//! ```
//!
//! Assignability is the reflexive, transitive closure of the declarations.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use super::key::{TypeKey, Value};

type Upcast = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
struct Edge {
    parent: TypeKey,
    upcast: Upcast,
}

#[derive(Default)]
struct Registry {
    edges: RwLock<HashMap<TypeId, Vec<Edge>>>,
}

static LINEAGE: LazyLock<Registry> = LazyLock::new(Registry::default);

/// Declares `C` a subtype of `P`.
///
/// Declaring the same pair twice replaces the upcast function.
pub fn declare<C, P, F>(upcast: F)
where
    C: Any + Send + Sync,
    P: Any + Send + Sync,
    F: Fn(&C) -> P + Send + Sync + 'static,
{
    let upcast: Upcast = Arc::new(move |value: &Value| {
        let child = value.downcast_ref::<C>()?;
        Some(Arc::new(upcast(child)) as Value)
    });
    let parent = TypeKey::of::<P>();
    let mut edges = LINEAGE.edges.write();
    let list = edges.entry(TypeId::of::<C>()).or_default();
    list.retain(|edge| edge.parent != parent);
    list.push(Edge { parent, upcast });
}

/// Direct parents declared for `key`.
pub fn parents(key: TypeKey) -> Vec<TypeKey> {
    LINEAGE
        .edges
        .read()
        .get(&key.id())
        .map(|edges| edges.iter().map(|edge| edge.parent).collect())
        .unwrap_or_default()
}

/// Returns true if `from` is `to` or one of its declared descendants.
pub fn is_assignable(from: TypeKey, to: TypeKey) -> bool {
    from == to || path(from, to).is_some()
}

/// Converts `value` of type `from` into a value of type `to`.
pub fn upcast(value: &Value, from: TypeKey, to: TypeKey) -> Option<Value> {
    if from == to {
        return Some(value.clone());
    }
    let steps = path(from, to)?;
    steps
        .iter()
        .try_fold(value.clone(), |current, step| step(&current))
}

/// Breadth first search for the shortest upcast chain.
fn path(from: TypeKey, to: TypeKey) -> Option<Vec<Upcast>> {
    let edges = LINEAGE.edges.read();
    let mut visited = HashSet::from([from.id()]);
    let mut queue = VecDeque::from([(from, Vec::<Upcast>::new())]);
    while let Some((node, steps)) = queue.pop_front() {
        let Some(next) = edges.get(&node.id()) else {
            continue;
        };
        for edge in next {
            if !visited.insert(edge.parent.id()) {
                continue;
            }
            let mut chain = steps.clone();
            chain.push(edge.upcast.clone());
            if edge.parent == to {
                return Some(chain);
            }
            queue.push_back((edge.parent, chain));
        }
    }
    None
}
