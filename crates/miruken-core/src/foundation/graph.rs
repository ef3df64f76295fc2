//! Axis-scoped traversal over parent/child graphs.
//!
//! Any node type exposing a parent and children can be walked along a
//! [`TraversalAxis`]. Every walk tracks the nodes it visited and fails with
//! [`Error::TraversalCircularity`] when one shows up again.

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};

/// A node in a traversable graph.
pub trait Traversing: Clone {
    fn parent(&self) -> Option<Self>;

    fn children(&self) -> Vec<Self>;

    /// Identity of the node used to detect cycles.
    fn node_id(&self) -> usize;

    /// Description used in circularity errors.
    fn describe(&self) -> String {
        format!("#{}", self.node_id())
    }
}

/// Direction of a traversal relative to the starting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraversalAxis {
    SelfOnly,
    Root,
    Child,
    Sibling,
    Ancestor,
    Descendant,
    DescendantReverse,
    SelfOrChild,
    SelfOrSibling,
    SelfOrAncestor,
    SelfOrDescendant,
    SelfOrDescendantReverse,
    SelfSiblingOrAncestor,
}

/// Visitor result: `Ok(true)` stops the walk.
pub type Visit = Result<bool>;

struct Walk {
    visited: HashSet<usize>,
}

impl Walk {
    fn new() -> Self {
        Self {
            visited: HashSet::new(),
        }
    }

    fn enter<N: Traversing>(&mut self, node: &N) -> Result<()> {
        if self.visited.insert(node.node_id()) {
            Ok(())
        } else {
            Err(Error::TraversalCircularity {
                node: node.describe(),
            })
        }
    }
}

/// Walks `node` along `axis`, stopping when the visitor asks to.
pub fn traverse<N, F>(node: &N, axis: TraversalAxis, mut visitor: F) -> Result<()>
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    use TraversalAxis::*;

    match axis {
        SelfOnly => visitor(node).map(drop),
        Root => {
            let mut walk = Walk::new();
            walk.enter(node)?;
            let mut root = node.clone();
            while let Some(parent) = root.parent() {
                walk.enter(&parent)?;
                root = parent;
            }
            visitor(&root).map(drop)
        }
        Child => children(node, &mut visitor).map(drop),
        Sibling => siblings(node, &mut visitor).map(drop),
        Ancestor => ancestors(node, &mut visitor).map(drop),
        Descendant => {
            let id = node.node_id();
            level_order(node, |n| if n.node_id() == id { Ok(false) } else { visitor(n) })
        }
        DescendantReverse => {
            let id = node.node_id();
            reverse_level_order(node, |n| if n.node_id() == id { Ok(false) } else { visitor(n) })
        }
        SelfOrChild => {
            if visitor(node)? {
                return Ok(());
            }
            children(node, &mut visitor).map(drop)
        }
        SelfOrSibling => {
            if visitor(node)? {
                return Ok(());
            }
            siblings(node, &mut visitor).map(drop)
        }
        SelfOrAncestor => {
            if visitor(node)? {
                return Ok(());
            }
            ancestors(node, &mut visitor).map(drop)
        }
        SelfOrDescendant => level_order(node, visitor),
        SelfOrDescendantReverse => reverse_level_order(node, visitor),
        SelfSiblingOrAncestor => {
            if visitor(node)? || siblings(node, &mut visitor)? {
                return Ok(());
            }
            ancestors(node, &mut visitor).map(drop)
        }
    }
}

fn children<N, F>(node: &N, visitor: &mut F) -> Visit
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    let mut walk = Walk::new();
    walk.enter(node)?;
    for child in node.children() {
        walk.enter(&child)?;
        if visitor(&child)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn siblings<N, F>(node: &N, visitor: &mut F) -> Visit
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    let Some(parent) = node.parent() else {
        return Ok(false);
    };
    let mut walk = Walk::new();
    walk.enter(&parent)?;
    walk.enter(node)?;
    for sibling in parent.children() {
        if sibling.node_id() == node.node_id() {
            continue;
        }
        walk.enter(&sibling)?;
        if visitor(&sibling)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ancestors<N, F>(node: &N, visitor: &mut F) -> Visit
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    let mut walk = Walk::new();
    walk.enter(node)?;
    let mut current = node.parent();
    while let Some(parent) = current {
        walk.enter(&parent)?;
        if visitor(&parent)? {
            return Ok(true);
        }
        current = parent.parent();
    }
    Ok(false)
}

/// Visits a node before its children, depth first.
pub fn pre_order<N, F>(node: &N, mut visitor: F) -> Result<()>
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    fn walk_node<N, F>(node: &N, walk: &mut Walk, visitor: &mut F) -> Visit
    where
        N: Traversing,
        F: FnMut(&N) -> Visit,
    {
        walk.enter(node)?;
        if visitor(node)? {
            return Ok(true);
        }
        for child in node.children() {
            if walk_node(&child, walk, visitor)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
    walk_node(node, &mut Walk::new(), &mut visitor).map(drop)
}

/// Visits a node after its children, depth first.
pub fn post_order<N, F>(node: &N, mut visitor: F) -> Result<()>
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    fn walk_node<N, F>(node: &N, walk: &mut Walk, visitor: &mut F) -> Visit
    where
        N: Traversing,
        F: FnMut(&N) -> Visit,
    {
        walk.enter(node)?;
        for child in node.children() {
            if walk_node(&child, walk, visitor)? {
                return Ok(true);
            }
        }
        visitor(node)
    }
    walk_node(node, &mut Walk::new(), &mut visitor).map(drop)
}

/// Visits nodes breadth first, starting with `node`.
pub fn level_order<N, F>(node: &N, mut visitor: F) -> Result<()>
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    let mut walk = Walk::new();
    let mut queue = VecDeque::from([node.clone()]);
    while let Some(next) = queue.pop_front() {
        walk.enter(&next)?;
        if visitor(&next)? {
            break;
        }
        queue.extend(next.children());
    }
    Ok(())
}

/// Visits the deepest level first, each level in insertion order.
pub fn reverse_level_order<N, F>(node: &N, mut visitor: F) -> Result<()>
where
    N: Traversing,
    F: FnMut(&N) -> Visit,
{
    let mut walk = Walk::new();
    let mut levels: Vec<Vec<N>> = Vec::new();
    let mut level = vec![node.clone()];
    while !level.is_empty() {
        let mut next = Vec::new();
        for n in &level {
            walk.enter(n)?;
            next.extend(n.children());
        }
        levels.push(std::mem::replace(&mut level, next));
    }
    for n in levels.iter().rev().flatten() {
        if visitor(n)? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone)]
    struct Node(Arc<Inner>);

    struct Inner {
        id: usize,
        parent: Mutex<Option<Node>>,
        children: Mutex<Vec<Node>>,
    }

    impl Node {
        fn new(id: usize) -> Self {
            Node(Arc::new(Inner {
                id,
                parent: Mutex::new(None),
                children: Mutex::new(Vec::new()),
            }))
        }

        fn add(&self, id: usize) -> Node {
            let child = Node::new(id);
            *child.0.parent.lock() = Some(self.clone());
            self.0.children.lock().push(child.clone());
            child
        }
    }

    impl Traversing for Node {
        fn parent(&self) -> Option<Self> {
            self.0.parent.lock().clone()
        }

        fn children(&self) -> Vec<Self> {
            self.0.children.lock().clone()
        }

        fn node_id(&self) -> usize {
            self.0.id
        }
    }

    // 1
    // ├── 2
    // │   ├── 4
    // │   └── 5
    // └── 3
    //     └── 6
    fn tree() -> (Node, Node, Node) {
        let root = Node::new(1);
        let two = root.add(2);
        let three = root.add(3);
        two.add(4);
        two.add(5);
        three.add(6);
        (root, two, three)
    }

    fn collect(node: &Node, axis: TraversalAxis) -> Vec<usize> {
        let mut ids = Vec::new();
        traverse(node, axis, |n| {
            ids.push(n.node_id());
            Ok(false)
        })
        .unwrap();
        ids
    }

    #[test]
    fn test_axes() {
        use TraversalAxis::*;
        let (root, two, _) = tree();
        assert_eq!(collect(&two, SelfOnly), vec![2]);
        assert_eq!(collect(&two, Root), vec![1]);
        assert_eq!(collect(&two, Child), vec![4, 5]);
        assert_eq!(collect(&two, Sibling), vec![3]);
        assert_eq!(collect(&two, Ancestor), vec![1]);
        assert_eq!(collect(&root, Descendant), vec![2, 3, 4, 5, 6]);
        assert_eq!(collect(&root, DescendantReverse), vec![4, 5, 6, 2, 3]);
        assert_eq!(collect(&two, SelfOrChild), vec![2, 4, 5]);
        assert_eq!(collect(&two, SelfOrSibling), vec![2, 3]);
        assert_eq!(collect(&two, SelfOrAncestor), vec![2, 1]);
        assert_eq!(collect(&root, SelfOrDescendant), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(collect(&root, SelfOrDescendantReverse), vec![4, 5, 6, 2, 3, 1]);
        assert_eq!(collect(&two, SelfSiblingOrAncestor), vec![2, 3, 1]);
    }

    #[test]
    fn test_depth_first_orders() {
        let (root, _, _) = tree();
        let mut pre = Vec::new();
        pre_order(&root, |n| {
            pre.push(n.node_id());
            Ok(false)
        })
        .unwrap();
        assert_eq!(pre, vec![1, 2, 4, 5, 3, 6]);

        let mut post = Vec::new();
        post_order(&root, |n| {
            post.push(n.node_id());
            Ok(false)
        })
        .unwrap();
        assert_eq!(post, vec![4, 5, 2, 6, 3, 1]);
    }

    #[test]
    fn test_visitor_stops() {
        let (root, _, _) = tree();
        let mut seen = Vec::new();
        level_order(&root, |n| {
            seen.push(n.node_id());
            Ok(n.node_id() == 3)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_cycle_fails_without_revisiting() {
        let (root, two, _) = tree();
        two.0.children.lock().push(root.clone());
        let mut seen = Vec::new();
        let err = pre_order(&root, |n| {
            seen.push(n.node_id());
            Ok(false)
        })
        .unwrap_err();
        assert!(matches!(err, Error::TraversalCircularity { .. }));
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), seen.len());

        let err = traverse(&root, TraversalAxis::SelfOrDescendant, |_| Ok(false)).unwrap_err();
        assert!(err.to_string().contains("circularity detected for node #1"));
    }
}
