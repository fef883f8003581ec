use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::core::tree::{NodeId, Tree};
use crate::core::types::RankSchema;
use crate::divergence::distribution::RankDistribution;
use crate::divergence::DivergenceError;
use crate::utils::count_to_f64;

/// How the tree must be rooted before RED is computed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RootPolicy {
    /// Use the root as written in the input tree
    #[default]
    AsGiven,
    /// Require a bifurcating root; anything else is a configuration error
    Fixed,
    /// Reroot on the edge above the node carrying this label or taxon
    Outgroup(String),
    /// Root on each named phylum in turn and take the median RED of every
    /// clade over those rootings; the input tree itself is left as given
    MedianOverPhyla,
}

/// Per-node summary of the subtree below it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubtreeStats {
    /// Mean path length from the node to its descendant leaves (0 for a leaf)
    pub mean_dist: f64,
    /// Number of descendant leaves (1 for a leaf)
    pub num_leaves: usize,
}

/// Compute [`SubtreeStats`] for every reachable node in one post-order pass.
///
/// The returned vector is indexed by [`NodeId`]; unreachable arena slots
/// hold the default value.
#[must_use]
pub fn subtree_stats(tree: &Tree) -> Vec<SubtreeStats> {
    let mut stats = vec![SubtreeStats::default(); tree.arena_len()];
    for id in tree.postorder() {
        let node = &tree[id];
        if node.is_leaf() {
            stats[id] = SubtreeStats {
                mean_dist: 0.0,
                num_leaves: 1,
            };
            continue;
        }

        let mut num_leaves = 0;
        let mut total_dist = 0.0;
        for &child in node.children() {
            let child_stats = stats[child];
            num_leaves += child_stats.num_leaves;
            total_dist += (tree[child].length() + child_stats.mean_dist)
                * count_to_f64(child_stats.num_leaves);
        }
        stats[id] = SubtreeStats {
            mean_dist: total_dist / count_to_f64(num_leaves),
            num_leaves,
        };
    }
    stats
}

/// RED value per node, indexed by [`NodeId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedValues {
    values: Vec<Option<f64>>,
}

impl RedValues {
    /// RED of `id`, or `None` for nodes not reachable from the root.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<f64> {
        self.values.get(id).copied().flatten()
    }

    /// All `(node, RED)` pairs in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(id, v)| v.map(|v| (id, v)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute RED for every reachable node of a tree rooted as given.
///
/// RED(root) = 0; for any other node with parent RED `x`, branch length `a`
/// and mean distance to its leaves `b`, RED = x + a / (a + b) * (1 - x).
/// When `a + b == 0` the node inherits `x`.
#[must_use]
pub fn relative_divergence(tree: &Tree) -> RedValues {
    let stats = subtree_stats(tree);
    let mut values = vec![None; tree.arena_len()];
    values[tree.root()] = Some(0.0);

    for id in tree.preorder().into_iter().skip(1) {
        let Some(parent_red) = tree[id].parent().and_then(|p| values[p]) else {
            continue;
        };
        let a = tree[id].length();
        let b = stats[id].mean_dist;
        let red = if a + b > 0.0 {
            parent_red + (a / (a + b)) * (1.0 - parent_red)
        } else {
            parent_red
        };
        values[id] = Some(red);
    }

    RedValues { values }
}

/// Applies a [`RootPolicy`] and computes RED.
#[derive(Debug, Clone, Default)]
pub struct RedEngine {
    policy: RootPolicy,
}

impl RedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(policy: RootPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RootPolicy {
        &self.policy
    }

    /// Root the tree according to the policy.
    ///
    /// # Errors
    ///
    /// Returns `DivergenceError::EmptyTree` for a tree without branches,
    /// `DivergenceError::UnrootedTree` if a fixed root is required but the
    /// root is not bifurcating, and `OutgroupNotFound`/`Reroot` if the
    /// outgroup cannot be located or rooted on.
    pub fn prepare(&self, tree: &mut Tree) -> Result<(), DivergenceError> {
        if tree[tree.root()].is_leaf() {
            return Err(DivergenceError::EmptyTree);
        }

        match &self.policy {
            RootPolicy::AsGiven | RootPolicy::MedianOverPhyla => {}
            RootPolicy::Fixed => {
                let children = tree[tree.root()].children().len();
                if children != 2 {
                    return Err(DivergenceError::UnrootedTree { children });
                }
            }
            RootPolicy::Outgroup(taxon) => {
                let id = tree
                    .find_by_taxon(taxon)
                    .ok_or_else(|| DivergenceError::OutgroupNotFound(taxon.clone()))?;
                if root_on(tree, id)? {
                    info!("Rerooted tree on outgroup {taxon}");
                } else {
                    debug!("Tree is already rooted on {taxon}");
                }
            }
        }
        Ok(())
    }

    /// Root the tree, compute RED and store each value on its node.
    ///
    /// # Errors
    ///
    /// Returns any error raised by [`RedEngine::prepare`].
    pub fn compute(&self, tree: &mut Tree) -> Result<RedValues, DivergenceError> {
        self.prepare(tree)?;
        let red = match self.policy {
            RootPolicy::MedianOverPhyla => median_over_phyla(tree)?,
            _ => relative_divergence(tree),
        };
        for (id, value) in red.iter() {
            tree[id].red = Some(value);
        }
        debug!("Computed RED for {} nodes", red.len());
        Ok(red)
    }
}

/// Reroot on the edge above `id` unless the root already splits `id` from
/// the rest of the tree. Returns whether the tree changed.
fn root_on(tree: &mut Tree, id: NodeId) -> Result<bool, DivergenceError> {
    let root = tree.root();
    if tree[id].parent() == Some(root) && tree[root].children().len() == 2 {
        return Ok(false);
    }
    tree.reroot_on(id)?;
    Ok(true)
}

/// First node carrying each named phylum, in pre-order, root excluded.
fn phylum_nodes(tree: &Tree) -> Vec<(String, NodeId)> {
    let schema = RankSchema::gtdb();
    let Some(phylum) = schema.rank_of_prefix("p__") else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    let mut nodes = Vec::new();
    for id in tree.preorder().into_iter().skip(1) {
        for taxon in tree[id].decoded_label().taxa() {
            if schema.rank_of_taxon(taxon) == Some(phylum)
                && !schema.is_placeholder(taxon)
                && seen.insert(taxon.to_string())
            {
                nodes.push((taxon.to_string(), id));
            }
        }
    }
    nodes
}

/// splitmix64 finaliser; spreads leaf ids before they are summed.
fn mix(id: NodeId) -> u64 {
    let mut z = u64::try_from(id)
        .unwrap_or(u64::MAX)
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Order-independent signature of the leaf set below every reachable node.
///
/// Leaf ids survive rerooting, so equal signatures in two rootings of the
/// same tree identify the same clade.
fn clade_signatures(tree: &Tree) -> Vec<(usize, u64)> {
    let mut signatures = vec![(0, 0); tree.arena_len()];
    for id in tree.postorder() {
        signatures[id] = if tree[id].is_leaf() {
            (1, mix(id))
        } else {
            tree[id].children().iter().fold((0, 0_u64), |(n, h), &c| {
                (n + signatures[c].0, h.wrapping_add(signatures[c].1))
            })
        };
    }
    signatures
}

/// Median RED of each clade over rootings on every named phylum.
///
/// Clades that exist in none of the rootings keep their RED under the root
/// as given. Without named phyla this is plain [`relative_divergence`].
fn median_over_phyla(tree: &Tree) -> Result<RedValues, DivergenceError> {
    let as_given = relative_divergence(tree);
    let phyla = phylum_nodes(tree);
    if phyla.is_empty() {
        warn!("No named phyla in tree; computing RED on the root as given");
        return Ok(as_given);
    }

    let targets = clade_signatures(tree);
    let reachable = tree.preorder();
    let mut samples: Vec<Vec<f64>> = vec![Vec::new(); tree.arena_len()];
    for (phylum, id) in &phyla {
        let mut rooted = tree.clone();
        root_on(&mut rooted, *id)?;
        let red = relative_divergence(&rooted);
        let signatures = clade_signatures(&rooted);
        let by_clade: HashMap<(usize, u64), f64> = rooted
            .preorder()
            .into_iter()
            .filter_map(|n| red.get(n).map(|v| (signatures[n], v)))
            .collect();

        for &n in &reachable {
            if let Some(&value) = by_clade.get(&targets[n]) {
                samples[n].push(value);
            }
        }
        debug!("Computed RED rooted on {phylum}");
    }
    info!("Took median RED over {} phylum rootings", phyla.len());

    let values = (0..tree.arena_len())
        .map(|n| {
            RankDistribution::from_values(samples[n].iter().copied())
                .median()
                .or_else(|| as_given.get(n))
        })
        .collect();
    Ok(RedValues { values })
}

/// Replace every branch length with the RED increment along it, so that
/// root-to-node path lengths equal RED.
pub fn apply_red_branch_lengths(tree: &mut Tree, red: &RedValues) {
    for id in tree.preorder().into_iter().skip(1) {
        let Some(parent) = tree[id].parent() else {
            continue;
        };
        if let (Some(node_red), Some(parent_red)) = (red.get(id), red.get(parent)) {
            tree[id].branch_length = Some(node_red - parent_red);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::newick::{parse_newick_str, to_newick};

    fn red_of(tree: &Tree, red: &RedValues, label: &str) -> f64 {
        red.get(tree.find_by_taxon(label).unwrap()).unwrap()
    }

    #[test]
    fn test_subtree_stats() {
        let tree = parse_newick_str("((A:1,B:3)X:1,C:2);").unwrap();
        let stats = subtree_stats(&tree);
        let x = tree.find_by_taxon("X").unwrap();
        assert_eq!(stats[x].num_leaves, 2);
        assert!((stats[x].mean_dist - 2.0).abs() < 1e-12);
        // Root: leaves at 2, 4 and 2
        assert!((stats[tree.root()].mean_dist - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats[tree.root()].num_leaves, 3);
    }

    #[test]
    fn test_minimal_tree() {
        let tree = parse_newick_str("((A:1,B:1)X:0,C:1);").unwrap();
        let red = relative_divergence(&tree);
        assert_eq!(red.get(tree.root()), Some(0.0));
        assert_eq!(red_of(&tree, &red, "X"), 0.0);
        assert_eq!(red_of(&tree, &red, "A"), 1.0);
        assert_eq!(red_of(&tree, &red, "B"), 1.0);
    }

    #[test]
    fn test_red_formula() {
        let tree = parse_newick_str("((A:1,B:3)X:1,C:2);").unwrap();
        let red = relative_divergence(&tree);
        // a = 1, b = 2
        assert!((red_of(&tree, &red, "X") - 1.0 / 3.0).abs() < 1e-12);
        assert!((red_of(&tree, &red, "C") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_and_bounded() {
        let tree =
            parse_newick_str("(((A:0.1,B:0.4):0.2,(C:0.3,D:0):0.05):0.3,((E:1,F:2):0,G:0.7):0.1);")
                .unwrap();
        let red = relative_divergence(&tree);
        for id in tree.preorder() {
            let value = red.get(id).unwrap();
            assert!((0.0..=1.0).contains(&value));
            if let Some(parent) = tree[id].parent() {
                assert!(value >= red.get(parent).unwrap());
                if tree[id].length() == 0.0 {
                    assert_eq!(value, red.get(parent).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_fixed_policy_rejects_trifurcation() {
        let mut tree = parse_newick_str("(A:1,B:1,C:1);").unwrap();
        let err = RedEngine::with_policy(RootPolicy::Fixed)
            .compute(&mut tree)
            .unwrap_err();
        assert!(matches!(err, DivergenceError::UnrootedTree { children: 3 }));

        let mut tree = parse_newick_str("((A:1,B:1):1,C:1);").unwrap();
        assert!(RedEngine::with_policy(RootPolicy::Fixed)
            .compute(&mut tree)
            .is_ok());
    }

    #[test]
    fn test_outgroup_policy() {
        let mut tree = parse_newick_str("(A:1,B:1,(C:1,D:1)p__Out:2);").unwrap();
        let engine = RedEngine::with_policy(RootPolicy::Outgroup("p__Out".to_string()));
        let red = engine.compute(&mut tree).unwrap();
        let out = tree.find_by_taxon("p__Out").unwrap();
        assert_eq!(tree[out].parent(), Some(tree.root()));
        assert_eq!(tree[tree.root()].children().len(), 2);
        assert_eq!(tree[out].red, red.get(out));

        let mut tree = parse_newick_str("(A:1,B:1);").unwrap();
        let engine = RedEngine::with_policy(RootPolicy::Outgroup("p__Missing".to_string()));
        assert!(matches!(
            engine.compute(&mut tree),
            Err(DivergenceError::OutgroupNotFound(_))
        ));
    }

    #[test]
    fn test_median_over_two_phyla_matches_fixed_root() {
        let newick = "((A:1,B:2)p__P1:0.5,((C:1,D:1):0.3,E:2)p__P2:1.5);";
        let mut fixed = parse_newick_str(newick).unwrap();
        let expected = RedEngine::with_policy(RootPolicy::Fixed)
            .compute(&mut fixed)
            .unwrap();

        let mut tree = parse_newick_str(newick).unwrap();
        let red = RedEngine::with_policy(RootPolicy::MedianOverPhyla)
            .compute(&mut tree)
            .unwrap();
        assert_eq!(tree, fixed);
        for id in tree.preorder() {
            let (a, b) = (red.get(id).unwrap(), expected.get(id).unwrap());
            assert!((a - b).abs() < 1e-12, "node {id}: {a} vs {b}");
        }
    }

    #[test]
    fn test_median_over_phyla_keeps_input_rooting() {
        let newick = "((A:1,B:2)p__P1:0.5,((C:1,D:1)p__P2:1.5,(E:2,F:1)p__P3:0.7):0.4);";
        let mut tree = parse_newick_str(newick).unwrap();
        let red = RedEngine::with_policy(RootPolicy::MedianOverPhyla)
            .compute(&mut tree)
            .unwrap();

        assert_eq!(to_newick(&tree), to_newick(&parse_newick_str(newick).unwrap()));
        assert_eq!(red.get(tree.root()), Some(0.0));
        for leaf in tree.leaves() {
            assert!((red.get(leaf).unwrap() - 1.0).abs() < 1e-12);
        }

        // p__P1 sees 0.25 as given, 0.5287 rooted on p__P2, 0.453125 on p__P3
        let p1 = tree.find_by_taxon("p__P1").unwrap();
        assert!((red.get(p1).unwrap() - 0.453_125).abs() < 1e-9);
        let p2 = tree.find_by_taxon("p__P2").unwrap();
        assert!((red.get(p2).unwrap() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_median_without_phyla_uses_given_root() {
        let mut tree = parse_newick_str("((A:1,B:3)g__X:1,C:2);").unwrap();
        let red = RedEngine::with_policy(RootPolicy::MedianOverPhyla)
            .compute(&mut tree)
            .unwrap();
        assert_eq!(red, relative_divergence(&tree));
    }

    #[test]
    fn test_scaled_branch_lengths() {
        let mut tree = parse_newick_str("((A:1,B:3)X:1,C:2);").unwrap();
        let red = RedEngine::new().compute(&mut tree).unwrap();
        apply_red_branch_lengths(&mut tree, &red);
        let depths = tree.root_distances();
        for id in tree.preorder() {
            assert!((depths[id] - red.get(id).unwrap()).abs() < 1e-12);
        }
    }
}
