//! RED decoration of internal node labels.
//!
//! Each eligible node receives an auxiliary field of the form
//!
//! ```text
//! perc=<percentile>|RED=<red>|pred=<rank prefix>
//! ```
//!
//! Fields always appear in this order; disabled fields are omitted and
//! undefined values are written as `NA`. Any previous auxiliary payload is
//! replaced, so decorating an already decorated tree is stable. Labels that
//! cannot be parsed are left untouched.
//!
//! With `prune` set, each outermost eligible clade is instead collapsed to a
//! leaf carrying the decorated label, its branch extended by the clade's mean
//! distance to its leaves.

use tracing::{info, warn};

use crate::core::label;
use crate::core::tree::{NodeId, Tree};
use crate::core::types::RankSchema;
use crate::divergence::distribution::RankDistributions;
use crate::divergence::red::{subtree_stats, RedValues};
use crate::divergence::thresholds::RankThresholds;
use crate::utils::format_optional;

/// What to write and which nodes to touch.
#[derive(Debug, Clone)]
pub struct DecorationConfig {
    /// Skip nodes whose support is below this value
    pub min_support: Option<f64>,
    /// Skip nodes with a branch shorter than this
    pub min_length: f64,
    /// Only decorate nodes already carrying a taxon
    pub only_named_clades: bool,
    /// Keep existing taxa on decorated labels
    pub retain_taxa: bool,
    pub percentile: bool,
    pub red: bool,
    pub prediction: bool,
    /// Collapse each outermost eligible clade into a single decorated leaf
    pub prune: bool,
}

impl Default for DecorationConfig {
    fn default() -> Self {
        Self {
            min_support: None,
            min_length: 0.0,
            only_named_clades: false,
            retain_taxa: true,
            percentile: true,
            red: true,
            prediction: true,
            prune: false,
        }
    }
}

/// Writes percentile, RED and predicted rank onto internal node labels.
pub struct Decorator<'a> {
    schema: &'a RankSchema,
    distributions: &'a RankDistributions,
    thresholds: &'a RankThresholds,
    config: DecorationConfig,
}

impl<'a> Decorator<'a> {
    #[must_use]
    pub fn new(
        schema: &'a RankSchema,
        distributions: &'a RankDistributions,
        thresholds: &'a RankThresholds,
    ) -> Self {
        Self::with_config(schema, distributions, thresholds, DecorationConfig::default())
    }

    #[must_use]
    pub fn with_config(
        schema: &'a RankSchema,
        distributions: &'a RankDistributions,
        thresholds: &'a RankThresholds,
        config: DecorationConfig,
    ) -> Self {
        Self {
            schema,
            distributions,
            thresholds,
            config,
        }
    }

    /// Rewrite the labels of all eligible nodes, returning how many changed.
    pub fn decorate(&self, tree: &mut Tree, red: &RedValues) -> usize {
        let eligible: Vec<NodeId> = tree
            .internal_nodes()
            .into_iter()
            .filter(|&id| self.is_eligible(tree, id))
            .collect();

        let stats = self.config.prune.then(|| subtree_stats(tree));
        let mut removed = vec![false; tree.arena_len()];
        let mut decorated = 0;
        for &id in &eligible {
            if removed[id] {
                continue;
            }
            let decoded = tree[id].decoded_label();
            let auxiliary = self.annotation(decoded.taxon(), red.get(id));
            let taxon = decoded.taxon().filter(|_| self.config.retain_taxa);
            tree[id].label = Some(label::encode(
                decoded.support(),
                taxon,
                Some(&auxiliary),
            ))
            .filter(|l| !l.is_empty());

            if let Some(stats) = &stats {
                for d in tree.preorder_from(id).into_iter().skip(1) {
                    removed[d] = true;
                }
                tree.collapse_to_leaf(id);
                let node = &mut tree[id];
                node.branch_length = Some(node.length() + stats[id].mean_dist);
            }
            decorated += 1;
        }

        if self.config.prune {
            info!("Pruned {decorated} clades to decorated leaves");
        } else {
            info!("Decorated {decorated} internal nodes");
        }
        decorated
    }

    fn is_eligible(&self, tree: &Tree, id: NodeId) -> bool {
        let node = &tree[id];
        if tree.is_root(id) || node.is_leaf() || node.length() < self.config.min_length {
            return false;
        }
        if node.has_malformed_label() {
            warn!(
                "Leaving node {id} undecorated: cannot parse label '{}'",
                node.label().unwrap_or_default()
            );
            return false;
        }

        let decoded = node.decoded_label();
        if let (Some(min), Some(support)) = (self.config.min_support, decoded.support_value()) {
            if support < min {
                return false;
            }
        }
        !self.config.only_named_clades || decoded.taxon().is_some()
    }

    /// Auxiliary field for a node with the given taxon and RED.
    fn annotation(&self, taxon: Option<&str>, red: Option<f64>) -> String {
        let predicted = red.and_then(|r| self.thresholds.predict(r));
        let mut fields = Vec::with_capacity(3);

        if self.config.percentile {
            let rank = taxon.and_then(|t| self.schema.lowest_rank(t)).or(predicted);
            let percentile = rank
                .and_then(|r| self.distributions.get(r))
                .zip(red)
                .and_then(|(dist, r)| dist.percentile_of(r));
            fields.push(format!("perc={}", format_optional(percentile, 1)));
        }
        if self.config.red {
            fields.push(format!("RED={}", format_optional(red, 3)));
        }
        if self.config.prediction {
            let prefix = predicted.map_or("NA", |r| self.schema.prefix(r));
            fields.push(format!("pred={prefix}"));
        }

        fields.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::label::decode;
    use crate::divergence::{DistributionBuilder, Metric, RedEngine};
    use crate::parsing::newick::parse_newick_str;

    fn setup() -> (RankSchema, Tree, RedValues, RankDistributions) {
        let schema = RankSchema::gtdb();
        let mut tree = parse_newick_str(
            "((((A:1,B:1)'95:g__G1':1,(C:1,D:1)g__G2:2)f__F1:1,(E:1,F:1)'20':0.01)p__P1:1,G:3);",
        )
        .unwrap();
        let red = RedEngine::new().compute(&mut tree).unwrap();
        let dists = DistributionBuilder::new(&schema).build(&tree, Metric::Red);
        (schema, tree, red, dists)
    }

    #[test]
    fn test_decorate_all_fields() {
        let (schema, mut tree, red, dists) = setup();
        let thresholds = RankThresholds::from_distributions(&dists);
        let count = Decorator::new(&schema, &dists, &thresholds).decorate(&mut tree, &red);
        // Every internal node except the root
        assert_eq!(count, 5);

        let g1 = tree.find_by_taxon("g__G1").unwrap();
        let label = tree[g1].label().unwrap().to_string();
        let decoded = decode(&label);
        assert_eq!(decoded.support_value(), Some(95.0));
        assert_eq!(decoded.taxon(), Some("g__G1"));
        let aux = decoded.auxiliary().unwrap();
        assert_eq!(
            aux,
            format!("perc=50.0|RED={:.3}|pred=g__", red.get(g1).unwrap())
        );
        // Round trip of a produced label
        assert_eq!(decoded.encode(), label);
    }

    #[test]
    fn test_decorate_is_stable() {
        let (schema, mut tree, red, dists) = setup();
        let thresholds = RankThresholds::from_distributions(&dists);
        let decorator = Decorator::new(&schema, &dists, &thresholds);
        decorator.decorate(&mut tree, &red);
        let first: Vec<Option<String>> = tree.preorder().iter().map(|&n| tree[n].label.clone()).collect();
        decorator.decorate(&mut tree, &red);
        let second: Vec<Option<String>> = tree.preorder().iter().map(|&n| tree[n].label.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decorate_filters() {
        let (schema, mut tree, red, dists) = setup();
        let thresholds = RankThresholds::default();
        let config = DecorationConfig {
            min_support: Some(50.0),
            min_length: 0.5,
            only_named_clades: true,
            percentile: false,
            prediction: true,
            ..DecorationConfig::default()
        };
        let count = Decorator::with_config(&schema, &dists, &thresholds, config)
            .decorate(&mut tree, &red);
        // g__G1, g__G2, f__F1 and p__P1; the unnamed low-support clade is skipped
        assert_eq!(count, 4);

        let f1 = tree.find_by_taxon("f__F1").unwrap();
        let expected = format!("f__F1|RED={:.3}|pred=NA", red.get(f1).unwrap());
        assert_eq!(tree[f1].label(), Some(expected.as_str()));

        let unnamed = tree
            .internal_nodes()
            .into_iter()
            .find(|&n| tree[n].label() == Some("20"));
        assert!(unnamed.is_some());
    }

    #[test]
    fn test_malformed_label_is_left_alone() {
        let schema = RankSchema::gtdb();
        let mut tree = parse_newick_str("(((A:1,B:1)'abc:g__X':1,C:2)p__P:1,D:3);").unwrap();
        let red = RedEngine::new().compute(&mut tree).unwrap();
        let dists = DistributionBuilder::new(&schema).build(&tree, Metric::Red);
        let thresholds = RankThresholds::from_distributions(&dists);

        let count = Decorator::new(&schema, &dists, &thresholds).decorate(&mut tree, &red);
        assert_eq!(count, 1);
        let x = tree.find_by_taxon("abc:g__X").unwrap();
        assert_eq!(tree[x].label(), Some("abc:g__X"));
        let p = tree.find_by_taxon("p__P").unwrap();
        assert!(tree[p].label().unwrap().starts_with("p__P|perc="));
    }

    #[test]
    fn test_prune_collapses_outermost_clades() {
        let (schema, mut tree, red, dists) = setup();
        let thresholds = RankThresholds::from_distributions(&dists);
        let f1 = tree.find_by_taxon("f__F1").unwrap();
        let g2 = tree.find_by_taxon("g__G2").unwrap();
        let stats = subtree_stats(&tree);
        let config = DecorationConfig {
            only_named_clades: true,
            min_length: 0.5,
            prune: true,
            ..DecorationConfig::default()
        };

        // Put p__P1 below the length cut so f__F1 is the outermost eligible clade
        let p1 = tree.find_by_taxon("p__P1").unwrap();
        tree[p1].branch_length = Some(0.1);

        let count = Decorator::with_config(&schema, &dists, &thresholds, config)
            .decorate(&mut tree, &red);
        assert_eq!(count, 1);
        assert!(tree[f1].is_leaf());
        assert!(!tree.preorder().contains(&g2));
        assert!((tree[f1].length() - (1.0 + stats[f1].mean_dist)).abs() < 1e-12);
        let decoded = decode(tree[f1].label().unwrap());
        assert_eq!(decoded.taxon(), Some("f__F1"));
        assert!(decoded.auxiliary().unwrap().starts_with("perc="));
        // Leaves A-D collapsed into f__F1; E, F and G remain
        assert_eq!(tree.num_leaves(), 4);
    }

    #[test]
    fn test_strip_taxa() {
        let (schema, mut tree, red, dists) = setup();
        let thresholds = RankThresholds::default();
        let config = DecorationConfig {
            retain_taxa: false,
            percentile: false,
            prediction: false,
            ..DecorationConfig::default()
        };
        let g2 = tree.find_by_taxon("g__G2").unwrap();
        Decorator::with_config(&schema, &dists, &thresholds, config).decorate(&mut tree, &red);
        let expected = format!("RED={:.3}", red.get(g2).unwrap());
        assert_eq!(decode(tree[g2].label().unwrap()).auxiliary(), Some(expected.as_str()));
        assert_eq!(decode(tree[g2].label().unwrap()).taxon(), None);
    }
}
