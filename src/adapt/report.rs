//! Reporting and export of a finished traversal.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapt::config::TraversalStats;
use crate::adapt::context::TraversalContext;
use crate::adapt::diagnostics::DiagnosticsReport;
use crate::adapt::game::{Equilibrium, Knowledge, Move};
use crate::adapt::key::CanonicalKey;
use crate::adapt::node::{AdaptationNode, NodeArena, NodeIndex, NodeLabel};
use crate::adapt::pool::{CandidateEquilibrium, Variant, VariantId, VariantPool};

/// A variant without its game description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRecord {
    /// Variant identifier.
    pub id: VariantId,
    /// Canonical key.
    pub key: CanonicalKey,
    /// Knowledge reported when it was produced.
    pub knowledge: Option<Knowledge>,
    /// Candidate equilibria.
    pub equilibria: Vec<Equilibrium>,
}

impl<G> From<&Variant<G>> for VariantRecord {
    fn from(variant: &Variant<G>) -> Self {
        Self {
            id: variant.id(),
            key: variant.key().clone(),
            knowledge: variant.knowledge(),
            equilibria: variant
                .candidates()
                .iter()
                .map(|candidate| candidate.equilibrium.clone())
                .collect(),
        }
    }
}

/// A node of the adaptation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Arena index.
    pub index: NodeIndex,
    /// Dotted tree label.
    pub label: NodeLabel,
    /// Parent index.
    pub parent: Option<NodeIndex>,
    /// Moves from the root.
    pub path: Vec<Move>,
    /// Canonical key of the path.
    pub key: CanonicalKey,
    /// Variant the node resolves to.
    pub variant: VariantId,
    /// Whether the move into this node changed the key.
    pub changed_from_parent: bool,
    /// Whether this node computed its variant.
    pub new_variant: bool,
}

impl<G> From<&AdaptationNode<G>> for NodeRecord {
    fn from(node: &AdaptationNode<G>) -> Self {
        Self {
            index: node.index(),
            label: node.label().clone(),
            parent: node.parent(),
            path: node.path().to_vec(),
            key: node.key().clone(),
            variant: node.variant().id(),
            changed_from_parent: node.is_changed_from_parent(),
            new_variant: node.is_new_variant(),
        }
    }
}

/// Everything a traversal produced, in serializable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalReport {
    /// Run statistics.
    pub stats: TraversalStats,
    /// Solver diagnostics.
    pub diagnostics: DiagnosticsReport,
    /// Best knowledge percentage and the variant holding it.
    pub max_knowledge: Option<(VariantId, f64)>,
    /// Stable misinformed equilibria.
    pub smes: Vec<Equilibrium>,
    /// Keys of the stable variants.
    pub terminal_set: Vec<CanonicalKey>,
    /// Every computed variant, by id.
    pub variants: Vec<VariantRecord>,
    /// Every node, by index.
    pub nodes: Vec<NodeRecord>,
}

impl TraversalReport {
    /// Collect the report from a traversal's state.
    pub fn new<G>(context: &TraversalContext<G>, stats: &TraversalStats) -> Self {
        Self {
            stats: stats.clone(),
            diagnostics: context.diagnostics().snapshot(),
            max_knowledge: context.max_knowledge(),
            smes: context.smes().into_iter().collect(),
            terminal_set: context.terminal_set().into_iter().collect(),
            variants: context
                .pool()
                .variants()
                .iter()
                .map(|variant| VariantRecord::from(variant.as_ref()))
                .collect(),
            nodes: context
                .nodes()
                .snapshot()
                .iter()
                .map(|node| NodeRecord::from(node.as_ref()))
                .collect(),
        }
    }

    /// Save the report as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Render the adaptation tree, one node per line.
///
/// Leaves are marked `[stable]`; changed children whose variant was computed
/// elsewhere are marked `[known]`.
pub fn render_tree<G>(nodes: &NodeArena<G>) -> String {
    let snapshot = nodes.snapshot();
    let children = nodes.children();
    let mut out = String::new();

    if let Some(root) = snapshot.first() {
        out.push_str(&node_line(root));
        out.push('\n');
        render_children(root.index(), "", &snapshot, &children, &mut out);
    }
    out
}

fn render_children<G>(
    parent: NodeIndex,
    prefix: &str,
    nodes: &[Arc<AdaptationNode<G>>],
    children: &[Vec<NodeIndex>],
    out: &mut String,
) {
    let siblings = &children[parent.0];
    for (i, child) in siblings.iter().enumerate() {
        let last = i + 1 == siblings.len();
        let node = &nodes[child.0];
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&node_line(node));
        out.push('\n');

        let deeper = format!("{}{}", prefix, if last { "    " } else { "│   " });
        render_children(*child, &deeper, nodes, children, out);
    }
}

fn node_line<G>(node: &AdaptationNode<G>) -> String {
    if node.is_leaf() {
        format!("{} [stable]", node.name())
    } else if node.is_changed_from_parent() && !node.is_new_variant() {
        format!("{} [known]", node.name())
    } else {
        node.name()
    }
}

/// One variant with its game, as written by the export functions.
#[derive(Serialize)]
struct VariantExport<'a, G> {
    id: VariantId,
    key: &'a CanonicalKey,
    knowledge: Option<Knowledge>,
    game: &'a G,
    equilibria: &'a [CandidateEquilibrium],
}

fn write_variant<G: Serialize>(variant: &Variant<G>, path: &Path) -> std::io::Result<()> {
    let export = VariantExport {
        id: variant.id(),
        key: variant.key(),
        knowledge: variant.knowledge(),
        game: variant.game(),
        equilibria: variant.candidates(),
    };
    let json = serde_json::to_string_pretty(&export)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Write every computed variant to `dir/variant_<id>.json`.
///
/// Returns the number of files written.
pub fn export_variants<G: Serialize>(pool: &VariantPool<G>, dir: impl AsRef<Path>) -> std::io::Result<usize> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let variants = pool.variants();
    for variant in &variants {
        write_variant(variant, &dir.join(format!("variant_{}.json", variant.id())))?;
    }
    log::info!("exported {} variants to {}", variants.len(), dir.display());
    Ok(variants.len())
}

/// Write every stable variant to `dir/stable_variant_<id>.json`.
///
/// Returns the number of files written.
pub fn export_terminal_set<G: Serialize>(
    pool: &VariantPool<G>,
    terminal_set: &BTreeSet<CanonicalKey>,
    dir: impl AsRef<Path>,
) -> std::io::Result<usize> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut written = 0;
    for key in terminal_set {
        let Some(variant) = pool.get(key).and_then(|slot| slot.get()) else {
            log::warn!("stable key {} has no computed variant", key);
            continue;
        };
        write_variant(&variant, &dir.join(format!("stable_variant_{}.json", variant.id())))?;
        written += 1;
    }
    log::info!("exported {} stable variants to {}", written, dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::game::MixedStrategy;
    use crate::adapt::pool::Claim;

    fn populate(context: &TraversalContext<u32>, path: &[Move], game: u32) -> Arc<Variant<u32>> {
        let eq = Equilibrium::new(vec![MixedStrategy::pure(0, 2), MixedStrategy::pure(0, 2)]);
        match context.pool().try_claim(CanonicalKey::from_path(path)) {
            Claim::Claimed(reservation) => {
                let variant = Variant::new(
                    reservation.id(),
                    reservation.key().clone(),
                    game,
                    Some(Knowledge::new(game as u64, 4)),
                    vec![eq],
                );
                context.pool().populate(reservation, variant)
            }
            Claim::Present(_) => panic!("expected a fresh claim"),
        }
    }

    /// Root with one changed child and one loop-back leaf.
    fn small_tree() -> TraversalContext<u32> {
        let context = TraversalContext::new();
        let a = Move::new(vec![0, 0]);
        let b = Move::new(vec![1, 1]);

        let root_variant = populate(&context, &[a.clone()], 2);
        let root = context
            .nodes()
            .insert_with(|i| AdaptationNode::root(i, vec![a.clone()], root_variant));
        let leaf = context
            .nodes()
            .insert_with(|i| AdaptationNode::loop_back(i, root.label().child(1), &root, a.clone()));
        context.record_leaf(&leaf);

        let next = populate(&context, &[a.clone(), b.clone()], 3);
        context
            .nodes()
            .insert_with(|i| AdaptationNode::changed(i, root.label().child(2), &root, b.clone(), next, true));
        context
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("adaptation-graph-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_render_tree() {
        let context = small_tree();
        let tree = render_tree(context.nodes());
        let lines: Vec<&str> = tree.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "N_0, MG_0, (50%)");
        assert_eq!(lines[1], "├── N_0.1, MG_0, (50%) [stable]");
        assert_eq!(lines[2], "└── N_0.2, MG_1, (75%)");
    }

    #[test]
    fn test_empty_tree_renders_nothing() {
        let context: TraversalContext<u32> = TraversalContext::new();
        assert!(render_tree(context.nodes()).is_empty());
    }

    #[test]
    fn test_report_collects_everything() {
        let context = small_tree();
        let report = TraversalReport::new(&context, &TraversalStats::new());

        assert_eq!(report.variants.len(), 2);
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(report.terminal_set.len(), 1);
        assert_eq!(report.max_knowledge, Some((VariantId(1), 75.0)));
        assert_eq!(report.nodes[1].variant, VariantId(0));
        assert!(!report.nodes[1].changed_from_parent);

        let json = serde_json::to_string(&report).unwrap();
        let back: TraversalReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nodes.len(), 3);
    }

    #[test]
    fn test_export_files() {
        let context = small_tree();
        let dir = scratch_dir("export");

        let written = export_variants(context.pool(), dir.join("all")).unwrap();
        assert_eq!(written, 2);
        assert!(dir.join("all").join("variant_0.json").exists());
        assert!(dir.join("all").join("variant_1.json").exists());

        let written = export_terminal_set(context.pool(), &context.terminal_set(), dir.join("stable")).unwrap();
        assert_eq!(written, 1);
        let json = fs::read_to_string(dir.join("stable").join("stable_variant_0.json")).unwrap();
        assert!(json.contains("\"game\": 2"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
