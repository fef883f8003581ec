//! Arena-backed rooted phylogenetic tree.
//!
//! Nodes are stored in a contiguous vector and referenced by [`NodeId`].
//! Parent links are plain indices (a back-reference, never ownership) and
//! children are kept in insertion order. Pruning and rerooting only rewire
//! indices: detached nodes stay in the arena but are unreachable from the
//! root, so every traversal starts at [`Tree::root`].

use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::core::label::{self, DecodedLabel};

/// Index of a node in the tree arena.
pub type NodeId = usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("Cannot reroot on the edge above the root")]
    RootEdge,
}

/// A single tree node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,

    /// Length of the branch to the parent; `None` when absent in the input
    pub branch_length: Option<f64>,

    /// Raw label text (taxon id for leaves, composite label for internal nodes)
    pub label: Option<String>,

    /// Relative evolutionary divergence, set once computed
    pub red: Option<f64>,
}

impl Node {
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Branch length, treating an absent length as zero.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.branch_length.unwrap_or(0.0)
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Decode the label into support, taxon and auxiliary parts.
    #[must_use]
    pub fn decoded_label(&self) -> DecodedLabel {
        self.label.as_deref().map(label::decode).unwrap_or_default()
    }

    /// True if the node has a label that [`label::try_decode`] rejects.
    #[must_use]
    pub fn has_malformed_label(&self) -> bool {
        self.label
            .as_deref()
            .is_some_and(|l| label::try_decode(l).is_none())
    }
}

/// A rooted tree with a single root and no cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree consisting of a single unlabeled root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            root: 0,
        }
    }

    /// Append a new child under `parent` and return its id.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a node of this tree.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        branch_length: Option<f64>,
        label: Option<String>,
    ) -> NodeId {
        assert!(parent < self.nodes.len(), "parent {parent} out of bounds");
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            label,
            red: None,
        });
        self.nodes[parent].children.push(id);
        id
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Size of the arena, including detached nodes. Per-node result vectors
    /// are sized with this so they can be indexed by [`NodeId`].
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    /// Reachable nodes in pre-order (parents before children, children in order).
    #[must_use]
    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    /// Nodes of the subtree rooted at `start` in pre-order.
    #[must_use]
    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    /// Reachable nodes in post-order (children before parents).
    #[must_use]
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter());
        }
        order.reverse();
        order
    }

    /// Reachable leaves in pre-order.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeId> {
        self.leaves_under(self.root)
    }

    /// Leaves of the subtree rooted at `id`.
    #[must_use]
    pub fn leaves_under(&self, id: NodeId) -> Vec<NodeId> {
        self.preorder_from(id)
            .into_iter()
            .filter(|&n| self.nodes[n].is_leaf())
            .collect()
    }

    /// Reachable internal (non-leaf) nodes in pre-order, root included.
    #[must_use]
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&n| !self.nodes[n].is_leaf())
            .collect()
    }

    #[must_use]
    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// Summed branch length from the root to every node, indexed by arena id.
    /// The root's own length is not counted.
    #[must_use]
    pub fn root_distances(&self) -> Vec<f64> {
        let mut dist = vec![0.0; self.nodes.len()];
        for id in self.preorder() {
            if let Some(parent) = self.nodes[id].parent {
                dist[id] = dist[parent] + self.nodes[id].length();
            }
        }
        dist
    }

    /// Ancestors of `id`, nearest first, ending with the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&n| self.nodes[n].parent)
    }

    /// Find the first reachable node (pre-order) whose raw label equals
    /// `label` or whose decoded taxon string contains `label` as a taxon.
    #[must_use]
    pub fn find_by_taxon(&self, label: &str) -> Option<NodeId> {
        self.preorder().into_iter().find(|&id| {
            let node = &self.nodes[id];
            node.label() == Some(label) || node.decoded_label().taxa().contains(&label)
        })
    }

    /// Reroot the tree on the midpoint of the branch above `id`.
    ///
    /// The path from `id` to the old root is reversed; the old root is
    /// spliced out if it is left with a single child.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::RootEdge`] if `id` is the root and
    /// [`TreeError::UnknownNode`] if `id` is not in the arena.
    pub fn reroot_on(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id >= self.nodes.len() {
            return Err(TreeError::UnknownNode(id));
        }
        let first = self.nodes[id].parent.ok_or(TreeError::RootEdge)?;
        let old_root = self.root;

        let half = self.nodes[id].length() / 2.0;
        let mut path = vec![first];
        path.extend(self.ancestors(first));

        let new_root = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: vec![id, first],
            branch_length: None,
            label: None,
            red: None,
        });

        self.nodes[first].children.retain(|&c| c != id);
        self.nodes[id].parent = Some(new_root);
        self.nodes[id].branch_length = Some(half);

        let mut incoming_parent = new_root;
        let mut incoming_length = half;
        for (i, &current) in path.iter().enumerate() {
            let old_length = self.nodes[current].length();
            if let Some(&old_parent) = path.get(i + 1) {
                self.nodes[old_parent].children.retain(|&c| c != current);
                self.nodes[current].children.push(old_parent);
            }
            self.nodes[current].parent = Some(incoming_parent);
            self.nodes[current].branch_length = Some(incoming_length);
            incoming_parent = current;
            incoming_length = old_length;
        }

        self.root = new_root;
        self.splice_if_unary(old_root);
        Ok(())
    }

    /// Remove a non-root node left with at most one child, joining its
    /// parent to its remaining child.
    fn splice_if_unary(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id].parent else {
            return;
        };
        let children = self.nodes[id].children.clone();
        match children.as_slice() {
            [] => {
                self.nodes[parent].children.retain(|&c| c != id);
            }
            &[child] => {
                let joined = self.nodes[child].length() + self.nodes[id].length();
                self.nodes[child].branch_length = Some(joined);
                self.nodes[child].parent = Some(parent);
                for c in &mut self.nodes[parent].children {
                    if *c == id {
                        *c = child;
                    }
                }
            }
            _ => return,
        }
        self.nodes[id].parent = None;
        self.nodes[id].children.clear();
    }

    /// Prune the clade below `id`, turning `id` into a leaf.
    pub fn collapse_to_leaf(&mut self, id: NodeId) {
        let descendants: Vec<NodeId> = self.preorder_from(id).into_iter().skip(1).collect();
        for d in descendants {
            self.nodes[d].parent = None;
        }
        self.nodes[id].children.clear();
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        &mut self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A:1,B:2)X:0.5,C:3);
    fn sample() -> (Tree, [NodeId; 4]) {
        let mut tree = Tree::new();
        let root = tree.root();
        let x = tree.add_child(root, Some(0.5), Some("X".into()));
        let a = tree.add_child(x, Some(1.0), Some("A".into()));
        let b = tree.add_child(x, Some(2.0), Some("B".into()));
        let c = tree.add_child(root, Some(3.0), Some("C".into()));
        (tree, [x, a, b, c])
    }

    #[test]
    fn test_traversals() {
        let (tree, [x, a, b, c]) = sample();
        let root = tree.root();
        assert_eq!(tree.preorder(), vec![root, x, a, b, c]);
        let post = tree.postorder();
        assert_eq!(post.last(), Some(&root));
        let pos = |n| post.iter().position(|&p| p == n).unwrap();
        assert!(pos(a) < pos(x) && pos(b) < pos(x));
        assert_eq!(tree.leaves(), vec![a, b, c]);
        assert_eq!(tree.internal_nodes(), vec![root, x]);
        assert_eq!(tree.ancestors(a).collect::<Vec<_>>(), vec![x, root]);

        let dist = tree.root_distances();
        assert_eq!(dist[root], 0.0);
        assert_eq!(dist[b], 2.5);
        assert_eq!(dist[c], 3.0);
    }

    #[test]
    fn test_reroot_on_leaf() {
        let (mut tree, [x, a, b, c]) = sample();
        let old_root = tree.root();
        tree.reroot_on(c).unwrap();

        let root = tree.root();
        assert_ne!(root, old_root);
        assert_eq!(tree[root].children(), &[c, x]);
        assert!((tree[c].length() - 1.5).abs() < 1e-12);
        // old root spliced out: X hangs off the new root with 1.5 + 0.5
        assert!((tree[x].length() - 2.0).abs() < 1e-12);
        assert_eq!(tree[x].parent(), Some(root));
        assert_eq!(tree.leaves(), vec![c, a, b]);
        assert!(!tree.preorder().contains(&old_root));
    }

    #[test]
    fn test_reroot_on_root_fails() {
        let (mut tree, _) = sample();
        let root = tree.root();
        assert_eq!(tree.reroot_on(root), Err(TreeError::RootEdge));
        assert_eq!(tree.reroot_on(99), Err(TreeError::UnknownNode(99)));
    }

    #[test]
    fn test_collapse_to_leaf() {
        let (mut tree, [x, _, _, c]) = sample();
        tree.collapse_to_leaf(x);
        assert!(tree[x].is_leaf());
        assert_eq!(tree.leaves(), vec![x, c]);
    }

    #[test]
    fn test_find_by_taxon() {
        let mut tree = Tree::new();
        let root = tree.root();
        let n = tree.add_child(root, Some(1.0), Some("90:p__A; c__B".into()));
        tree.add_child(n, Some(1.0), Some("leaf1".into()));
        assert_eq!(tree.find_by_taxon("c__B"), Some(n));
        assert_eq!(tree.find_by_taxon("leaf1"), Some(2));
        assert_eq!(tree.find_by_taxon("c__Z"), None);
    }
}
