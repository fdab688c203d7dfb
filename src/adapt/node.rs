//! Nodes of the adaptation tree and the arena that owns them.
//!
//! Nodes refer to their parent by arena index rather than by pointer, so a
//! snapshot of the tree can be exported without ownership cycles.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};

use crate::adapt::game::Move;
use crate::adapt::key::CanonicalKey;
use crate::adapt::pool::Variant;

/// Stable position of a node in the [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub usize);

/// Dotted tree position of a node: `0`, `0.1`, `0.1.2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeLabel(String);

impl NodeLabel {
    /// Label of the root.
    pub fn root() -> Self {
        Self("0".to_string())
    }

    /// Label of this node's `ordinal`-th child (1-based).
    pub fn child(&self, ordinal: usize) -> Self {
        Self(format!("{}.{}", self.0, ordinal))
    }

    /// Position among its siblings (1-based); 0 for the root.
    pub fn ordinal(&self) -> usize {
        match self.0.rsplit_once('.') {
            Some((_, last)) => last.parse().unwrap_or(0),
            None => 0,
        }
    }

    /// Depth in the tree; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.0.matches('.').count()
    }

    /// The label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One point of the exploration.
#[derive(Debug)]
pub struct AdaptationNode<G> {
    index: NodeIndex,
    label: NodeLabel,
    parent: Option<NodeIndex>,
    path: Vec<Move>,
    key: CanonicalKey,
    variant: Arc<Variant<G>>,
    changed_from_parent: bool,
    new_variant: bool,
}

impl<G> AdaptationNode<G> {
    /// The root node. Its variant is new; it has no parent to change from.
    pub fn root(index: NodeIndex, path: Vec<Move>, variant: Arc<Variant<G>>) -> Self {
        Self {
            index,
            label: NodeLabel::root(),
            key: variant.key().clone(),
            parent: None,
            path,
            variant,
            changed_from_parent: false,
            new_variant: true,
        }
    }

    /// A child whose move was already applied: it shares its parent's
    /// variant and key.
    pub fn loop_back(index: NodeIndex, label: NodeLabel, parent: &Self, mv: Move) -> Self {
        let mut path = parent.path.clone();
        path.push(mv);
        Self {
            index,
            label,
            parent: Some(parent.index),
            path,
            key: parent.key.clone(),
            variant: Arc::clone(&parent.variant),
            changed_from_parent: false,
            new_variant: false,
        }
    }

    /// A child whose move changed the key.
    pub fn changed(
        index: NodeIndex,
        label: NodeLabel,
        parent: &Self,
        mv: Move,
        variant: Arc<Variant<G>>,
        new_variant: bool,
    ) -> Self {
        let mut path = parent.path.clone();
        path.push(mv);
        Self {
            index,
            label,
            parent: Some(parent.index),
            path,
            key: variant.key().clone(),
            variant,
            changed_from_parent: true,
            new_variant,
        }
    }

    /// Arena index.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Tree label.
    pub fn label(&self) -> &NodeLabel {
        &self.label
    }

    /// Parent index, `None` for the root.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Moves applied from the root, in order.
    pub fn path(&self) -> &[Move] {
        &self.path
    }

    /// Canonical key of the path.
    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// The shared variant this node resolves to.
    pub fn variant(&self) -> &Arc<Variant<G>> {
        &self.variant
    }

    /// False only for the root and for loop-back children.
    pub fn is_changed_from_parent(&self) -> bool {
        self.changed_from_parent
    }

    /// True only for the node whose thread computed the variant.
    pub fn is_new_variant(&self) -> bool {
        self.new_variant
    }

    /// Leaves are loop-back children: non-root nodes that did not change.
    pub fn is_leaf(&self) -> bool {
        self.parent.is_some() && !self.changed_from_parent
    }

    /// Display name used when rendering the tree.
    pub fn name(&self) -> String {
        match self.variant.knowledge() {
            Some(knowledge) => format!(
                "N_{}, MG_{}, ({}%)",
                self.label,
                self.variant.id(),
                knowledge.percentage()
            ),
            None => format!("N_{}, MG_{}", self.label, self.variant.id()),
        }
    }
}

impl<G> fmt::Display for AdaptationNode<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.path.iter().map(|m| m.to_string()).collect();
        writeln!(f, "| Node Name: {}", self.name())?;
        writeln!(f, "| Variant id: {}", self.variant.id())?;
        writeln!(f, "| Path: [{}]", path.join(", "))?;
        writeln!(f, "| Key: {}", self.key)?;
        write!(f, "| Equilibria: {}", self.variant.num_equilibria())
    }
}

/// Append-only store of every node created during a traversal.
#[derive(Debug)]
pub struct NodeArena<G> {
    nodes: RwLock<Vec<Arc<AdaptationNode<G>>>>,
}

impl<G> Default for NodeArena<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> NodeArena<G> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<AdaptationNode<G>>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node built from its freshly assigned index.
    pub fn insert_with<F>(&self, build: F) -> Arc<AdaptationNode<G>>
    where
        F: FnOnce(NodeIndex) -> AdaptationNode<G>,
    {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let node = Arc::new(build(NodeIndex(nodes.len())));
        debug_assert_eq!(node.index().0, nodes.len());
        nodes.push(Arc::clone(&node));
        node
    }

    /// Node at `index`.
    pub fn get(&self, index: NodeIndex) -> Option<Arc<AdaptationNode<G>>> {
        self.read().get(index.0).cloned()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True before the root is inserted.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of every node in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<AdaptationNode<G>>> {
        self.read().clone()
    }

    /// Child indices of every node, indexed by parent.
    pub fn children(&self) -> Vec<Vec<NodeIndex>> {
        let nodes = self.read();
        let mut children = vec![Vec::new(); nodes.len()];
        for node in nodes.iter() {
            if let Some(parent) = node.parent() {
                children[parent.0].push(node.index());
            }
        }
        // siblings are inserted concurrently; restore move order
        for siblings in children.iter_mut() {
            siblings.sort_by_key(|child| nodes[child.0].label().ordinal());
        }
        children
    }
}
