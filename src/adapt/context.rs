//! Shared state of one traversal.
//!
//! Each collection is guarded on its own; workers append to them in any
//! order and only atomicity per append is required.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use crate::adapt::diagnostics::Diagnostics;
use crate::adapt::game::Equilibrium;
use crate::adapt::key::CanonicalKey;
use crate::adapt::node::{AdaptationNode, NodeArena, NodeIndex};
use crate::adapt::pool::{VariantId, VariantPool};

/// Everything a traversal accumulates.
#[derive(Debug)]
pub struct TraversalContext<G> {
    pool: VariantPool<G>,
    nodes: NodeArena<G>,
    leaves: RwLock<Vec<NodeIndex>>,
    terminal_set: RwLock<BTreeSet<CanonicalKey>>,
    smes: RwLock<BTreeSet<Equilibrium>>,
    diagnostics: Diagnostics,
}

impl<G> Default for TraversalContext<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> TraversalContext<G> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            pool: VariantPool::new(),
            nodes: NodeArena::new(),
            leaves: RwLock::new(Vec::new()),
            terminal_set: RwLock::new(BTreeSet::new()),
            smes: RwLock::new(BTreeSet::new()),
            diagnostics: Diagnostics::new(),
        }
    }

    /// The variant pool.
    pub fn pool(&self) -> &VariantPool<G> {
        &self.pool
    }

    /// The node arena.
    pub fn nodes(&self) -> &NodeArena<G> {
        &self.nodes
    }

    /// Diagnostic counters.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Record a loop-back node: it is a leaf and its key is stable.
    pub fn record_leaf(&self, node: &AdaptationNode<G>) {
        self.leaves
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node.index());
        self.terminal_set
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.key().clone());
    }

    /// Add stable equilibria; duplicates collapse.
    pub fn insert_smes<I>(&self, smes: I)
    where
        I: IntoIterator<Item = Equilibrium>,
    {
        let mut set = self.smes.write().unwrap_or_else(PoisonError::into_inner);
        set.extend(smes);
    }

    /// Indices of every leaf, in recording order.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.leaves.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.leaves.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Keys of the stable variants.
    pub fn terminal_set(&self) -> BTreeSet<CanonicalKey> {
        self.terminal_set
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The stable misinformed equilibria.
    pub fn smes(&self) -> BTreeSet<Equilibrium> {
        self.smes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Highest knowledge percentage among the computed variants.
    pub fn max_knowledge(&self) -> Option<(VariantId, f64)> {
        self.pool
            .variants()
            .iter()
            .filter_map(|variant| variant.knowledge().map(|k| (variant.id(), k.percentage())))
            .fold(None, |best, (id, percentage)| match best {
                Some((_, top)) if top >= percentage => best,
                _ => Some((id, percentage)),
            })
    }
}
