use std::collections::HashMap;
use std::sync::Arc;

use crate::binding::Binding;
use crate::foundation::Key;
use crate::handle_result::HandleResult;

use super::Policy;

/// Bindings of one policy ordered for dispatch.
///
/// Variant keys live in a single list sorted by [`Policy::less`], with an
/// index pointing at the first binding of every key. Invariant keys are
/// grouped by key; the catch-all bindings sit at the end of the variant
/// list and act as the fallback for both.
pub struct PolicyBindings {
    policy: &'static dyn Policy,
    variant: Vec<Arc<Binding>>,
    index: HashMap<Key, usize>,
    invariant: HashMap<Key, Vec<Arc<Binding>>>,
}

impl PolicyBindings {
    pub fn new(policy: &'static dyn Policy) -> Self {
        Self {
            policy,
            variant: Vec::new(),
            index: HashMap::new(),
            invariant: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &'static dyn Policy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.variant.len() + self.invariant.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, binding: Arc<Binding>) {
        let key = binding.key().clone();
        let (variant, unknown) = self.policy.variant_key(&key);
        if !variant {
            self.invariant.entry(key).or_default().push(binding);
            return;
        }
        if unknown {
            self.index.entry(key).or_insert(self.variant.len());
            self.variant.push(binding);
            return;
        }
        let indexed = self.index.get(&key).copied();
        let mut pos = indexed.unwrap_or(0);
        while pos < self.variant.len() && !self.policy.less(&key, self.variant[pos].key()) {
            pos += 1;
        }
        self.variant.insert(pos, binding);
        for idx in self.index.values_mut() {
            if *idx >= pos {
                *idx += 1;
            }
        }
        if indexed.is_none() {
            self.index.insert(key, pos);
        }
    }

    /// Folds `reducer` over the candidates for `key` in dispatch order.
    ///
    /// The reducer returns the new result and whether to stop.
    pub fn reduce<F>(&self, key: &Key, mut reducer: F) -> HandleResult
    where
        F: FnMut(&Arc<Binding>, HandleResult) -> (HandleResult, bool),
    {
        let mut result = HandleResult::NOT_HANDLED;
        let (variant, _) = self.policy.variant_key(key);
        if key.is_any() {
            for binding in self.variant.iter().chain(self.invariant.values().flatten()) {
                let (next, done) = reducer(binding, result);
                result = next;
                if done {
                    break;
                }
            }
            return result;
        }
        if variant {
            let start = self.index.get(key).copied().unwrap_or(0);
            for binding in &self.variant[start..] {
                let (next, done) = reducer(binding, result);
                result = next;
                if done {
                    break;
                }
            }
            return result;
        }
        if let Some(bindings) = self.invariant.get(key) {
            for binding in bindings {
                let (next, done) = reducer(binding, result);
                result = next;
                if done {
                    return result;
                }
            }
        }
        if let Some(start) = self.index.get(&Key::Any).copied() {
            for binding in &self.variant[start..] {
                let (next, done) = reducer(binding, result);
                result = next;
                if done {
                    break;
                }
            }
        }
        result
    }

    /// Every binding in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.variant.iter().chain(self.invariant.values().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;
    use crate::foundation::lineage;
    use crate::policy::{HANDLES, PROVIDES};

    struct Shape;
    struct Circle;
    struct Square;

    fn keys(bindings: &PolicyBindings, key: &Key) -> Vec<String> {
        let mut visited = Vec::new();
        let policy = bindings.policy();
        bindings.reduce(key, |binding, result| {
            if policy.matches_key(binding.key(), key, false) {
                visited.push(binding.key().to_string());
            }
            (result, false)
        });
        visited
    }

    #[test]
    fn test_specific_keys_first_then_any() {
        lineage::declare::<Circle, Shape, _>(|_| Shape);
        lineage::declare::<Square, Shape, _>(|_| Shape);
        let mut bindings = PolicyBindings::new(&HANDLES);
        bindings.insert(Arc::new(Binding::stub(&HANDLES, Key::Any)));
        bindings.insert(Arc::new(Binding::stub(&HANDLES, Key::of::<Shape>())));
        bindings.insert(Arc::new(Binding::stub(&HANDLES, Key::of::<Circle>())));
        bindings.insert(Arc::new(Binding::stub(&HANDLES, Key::of::<Square>())));
        bindings.insert(Arc::new(Binding::stub(&HANDLES, Key::name("draw"))));

        assert_eq!(keys(&bindings, &Key::of::<Circle>()), vec!["Circle", "Shape", "*"]);
        assert_eq!(keys(&bindings, &Key::of::<Shape>()), vec!["Shape", "*"]);
        assert_eq!(keys(&bindings, &Key::name("draw")), vec!["\"draw\"", "*"]);
        assert_eq!(bindings.len(), 5);
        assert_eq!(
            keys(&bindings, &Key::of::<Circle>()),
            keys(&bindings, &Key::of::<Circle>())
        );
    }

    #[test]
    fn test_supertype_request_reaches_every_provider() {
        lineage::declare::<Circle, Shape, _>(|_| Shape);
        lineage::declare::<Square, Shape, _>(|_| Shape);
        let mut bindings = PolicyBindings::new(&PROVIDES);
        bindings.insert(Arc::new(Binding::stub(&PROVIDES, Key::of::<Circle>())));
        bindings.insert(Arc::new(Binding::stub(&PROVIDES, Key::Any)));
        bindings.insert(Arc::new(Binding::stub(&PROVIDES, Key::of::<Shape>())));
        bindings.insert(Arc::new(Binding::stub(&PROVIDES, Key::of::<Square>())));

        assert_eq!(keys(&bindings, &Key::of::<Shape>()), vec!["Shape", "Circle", "Square", "*"]);
        assert_eq!(keys(&bindings, &Key::of::<Circle>()), vec!["Circle", "*"]);
    }
}
