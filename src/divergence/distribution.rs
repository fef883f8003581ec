//! Per-rank empirical distributions of RED or mean branch length.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::taxonomy::{named_nodes, Taxonomy};
use crate::core::tree::{NodeId, Tree};
use crate::core::types::{Rank, RankSchema};
use crate::divergence::red::subtree_stats;
use crate::utils::count_to_f64;

/// Quantity aggregated per rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    /// RED stored on each node by [`crate::divergence::RedEngine::compute`]
    Red,
    /// Mean path length from a node to its descendant leaves
    MeanBranchLength,
}

impl Metric {
    /// Value of this metric for every node, indexed by [`NodeId`].
    #[must_use]
    pub fn node_values(self, tree: &Tree) -> Vec<Option<f64>> {
        match self {
            Self::Red => (0..tree.arena_len()).map(|id| tree[id].red).collect(),
            Self::MeanBranchLength => {
                let mut values = vec![None; tree.arena_len()];
                let stats = subtree_stats(tree);
                for id in tree.preorder() {
                    values[id] = Some(stats[id].mean_dist);
                }
                values
            }
        }
    }
}

/// Sorted sample of values observed at one rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankDistribution {
    values: Vec<f64>,
}

impl RankDistribution {
    /// Build a distribution; non-finite values are dropped.
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        values.sort_by(f64::total_cmp);
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in ascending order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.values.first().copied()
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.values.last().copied()
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / count_to_f64(self.values.len()))
    }

    /// Population standard deviation.
    #[must_use]
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / count_to_f64(self.values.len());
        Some(variance.sqrt())
    }

    #[must_use]
    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Value at percentile `p` (clamped to `[0, 100]`), linearly interpolated
    /// between the two closest order statistics.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let last = self.values.len().checked_sub(1)?;
        let position = p.clamp(0.0, 100.0) / 100.0 * count_to_f64(last);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lower = position.floor() as usize;
        let upper = (lower + 1).min(last);
        let fraction = position - count_to_f64(lower);
        let (a, b) = (self.values[lower], self.values[upper]);
        Some(a + (b - a) * fraction)
    }

    /// Percentage of values less than or equal to `x`.
    #[must_use]
    pub fn percentile_of(&self, x: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let at_or_below = self.values.partition_point(|&v| v <= x);
        Some(100.0 * count_to_f64(at_or_below) / count_to_f64(self.values.len()))
    }
}

/// A named internal node and the value it contributes at its lowest rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonObservation {
    pub node: NodeId,
    /// Most specific taxon on the node label
    pub taxon: String,
    #[serde(skip)]
    pub rank: Rank,
    pub value: f64,
    /// Named taxa from the root down to and including `taxon`
    pub lineage: Vec<String>,
    /// Whether the value passed the baseline filters and entered the distribution
    pub in_baseline: bool,
}

/// Distributions for every rank with at least one baseline observation.
#[derive(Debug, Clone, Default)]
pub struct RankDistributions {
    metric: Option<Metric>,
    by_rank: BTreeMap<Rank, RankDistribution>,
    observations: Vec<TaxonObservation>,
}

impl RankDistributions {
    #[must_use]
    pub fn metric(&self) -> Option<Metric> {
        self.metric
    }

    #[must_use]
    pub fn get(&self, rank: Rank) -> Option<&RankDistribution> {
        self.by_rank.get(&rank)
    }

    /// Ranks with data, most general first.
    pub fn iter(&self) -> impl Iterator<Item = (Rank, &RankDistribution)> {
        self.by_rank.iter().map(|(r, d)| (*r, d))
    }

    /// Every named node considered, in tree pre-order, including those
    /// excluded from the baseline.
    #[must_use]
    pub fn observations(&self) -> &[TaxonObservation] {
        &self.observations
    }

    #[must_use]
    pub fn median(&self, rank: Rank) -> Option<f64> {
        self.get(rank)?.median()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }
}

/// Filters deciding which named nodes enter the per-rank baseline.
#[derive(Debug, Clone, Default)]
pub struct DistributionConfig {
    /// Minimum number of named child taxa (leaves, for species)
    pub min_children: usize,
    /// Minimum support; nodes without a support value always pass
    pub min_support: Option<f64>,
    /// Restrict the baseline to lineages made up entirely of these taxa
    pub trusted_taxa: Option<BTreeSet<String>>,
}

/// Builds [`RankDistributions`] from a tree whose nodes carry the metric.
pub struct DistributionBuilder<'a> {
    schema: &'a RankSchema,
    taxonomy: Option<&'a Taxonomy>,
    config: DistributionConfig,
}

impl<'a> DistributionBuilder<'a> {
    #[must_use]
    pub fn new(schema: &'a RankSchema) -> Self {
        Self {
            schema,
            taxonomy: None,
            config: DistributionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DistributionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an explicit taxonomy for child counts and trusted lineages
    /// instead of the one implied by the tree labels.
    #[must_use]
    pub fn with_taxonomy(mut self, taxonomy: &'a Taxonomy) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    #[must_use]
    pub fn build(&self, tree: &Tree, metric: Metric) -> RankDistributions {
        let values = metric.node_values(tree);

        let derived;
        let taxonomy = if let Some(taxonomy) = self.taxonomy {
            taxonomy
        } else {
            derived = Taxonomy::from_tree(tree, self.schema, true);
            &derived
        };
        let children = taxonomy.taxon_children(self.schema);

        let mut observations = Vec::new();
        let mut by_rank: BTreeMap<Rank, Vec<f64>> = BTreeMap::new();
        for named in named_nodes(tree, self.schema) {
            if tree.is_root(named.node) {
                continue;
            }
            let Some(value) = values[named.node] else {
                warn!("No value for node labeled {}", named.lowest_taxon());
                continue;
            };

            let taxon = named.lowest_taxon().to_string();
            let lineage = tree_lineage(tree, named.node, &named.taxa);
            let in_baseline = self.passes_filters(&taxon, named.support, &lineage, taxonomy, &children);
            if in_baseline {
                by_rank.entry(named.rank).or_default().push(value);
            }

            observations.push(TaxonObservation {
                node: named.node,
                taxon,
                rank: named.rank,
                value,
                lineage,
                in_baseline,
            });
        }

        let excluded = observations.iter().filter(|o| !o.in_baseline).count();
        debug!(
            "Collected {} named nodes ({excluded} excluded from baseline)",
            observations.len()
        );

        RankDistributions {
            metric: Some(metric),
            by_rank: by_rank
                .into_iter()
                .map(|(rank, v)| (rank, RankDistribution::from_values(v)))
                .collect(),
            observations,
        }
    }

    fn passes_filters(
        &self,
        taxon: &str,
        support: Option<f64>,
        lineage: &[String],
        taxonomy: &Taxonomy,
        children: &BTreeMap<String, BTreeSet<String>>,
    ) -> bool {
        if let (Some(min), Some(support)) = (self.config.min_support, support) {
            if support < min {
                return false;
            }
        }

        if self.config.min_children > 0 {
            let count = children.get(taxon).map_or(0, BTreeSet::len);
            if count < self.config.min_children {
                return false;
            }
        }

        if let Some(trusted) = &self.config.trusted_taxa {
            let lineage = taxonomy.lineage_of_taxon(taxon).unwrap_or(lineage);
            if !lineage.iter().all(|t| trusted.contains(t)) {
                return false;
            }
        }

        true
    }
}

/// Named taxa on the labels from the root down to `node`, ending with
/// the node's own taxa.
fn tree_lineage(tree: &Tree, node: NodeId, own_taxa: &[String]) -> Vec<String> {
    let mut path: Vec<NodeId> = tree.ancestors(node).collect();
    path.reverse();
    let mut lineage: Vec<String> = path
        .into_iter()
        .flat_map(|n| {
            tree[n]
                .decoded_label()
                .taxa()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    lineage.extend(own_taxa.iter().cloned());
    lineage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::divergence::RedEngine;
    use crate::parsing::newick::parse_newick_str;

    #[test]
    fn test_percentiles() {
        let dist = RankDistribution::from_values([0.5, 0.1, 0.3, 0.9]);
        assert_eq!(dist.percentile(0.0), Some(0.1));
        assert_eq!(dist.percentile(100.0), Some(0.9));
        assert!((dist.median().unwrap() - 0.4).abs() < 1e-12);

        let mut previous = f64::NEG_INFINITY;
        for p in 0..=100 {
            let value = dist.percentile(f64::from(p)).unwrap();
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_summary_statistics() {
        let dist = RankDistribution::from_values([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(dist.mean(), Some(5.0));
        assert_eq!(dist.std_dev(), Some(2.0));
        assert_eq!(dist.percentile_of(4.0), Some(50.0));
        assert_eq!(dist.percentile_of(1.0), Some(0.0));
        assert_eq!(dist.percentile_of(9.0), Some(100.0));
    }

    #[test]
    fn test_empty_distribution() {
        let dist = RankDistribution::from_values([]);
        assert!(dist.is_empty());
        assert_eq!(dist.percentile(50.0), None);
        assert_eq!(dist.mean(), None);
        assert_eq!(dist.std_dev(), None);
        assert_eq!(dist.percentile_of(0.5), None);
    }

    #[test]
    fn test_single_value() {
        let dist = RankDistribution::from_values([0.7]);
        assert_eq!(dist.percentile(0.0), Some(0.7));
        assert_eq!(dist.percentile(63.0), Some(0.7));
        assert_eq!(dist.std_dev(), Some(0.0));
    }

    fn annotated_tree() -> Tree {
        let mut tree = parse_newick_str(
            "(((A:0.1,B:0.1)'90:g__G1':0.2,(C:0.1,D:0.1)'40:g__G2':0.3)f__F1:0.5,(E:0.2,F:0.2)g__G3:0.9);",
        )
        .unwrap();
        RedEngine::new().compute(&mut tree).unwrap();
        tree
    }

    #[test]
    fn test_build_groups_by_lowest_rank() {
        let schema = RankSchema::gtdb();
        let tree = annotated_tree();
        let dists = DistributionBuilder::new(&schema).build(&tree, Metric::Red);

        let genus = schema.rank_of_prefix("g__").unwrap();
        let family = schema.rank_of_prefix("f__").unwrap();
        assert_eq!(dists.get(genus).unwrap().len(), 3);
        assert_eq!(dists.get(family).unwrap().len(), 1);
        assert_eq!(dists.observations().len(), 4);
        assert_eq!(
            dists.observations()[1].lineage,
            vec!["f__F1".to_string(), "g__G1".to_string()]
        );
    }

    #[test]
    fn test_support_and_trusted_filters() {
        let schema = RankSchema::gtdb();
        let tree = annotated_tree();
        let genus = schema.rank_of_prefix("g__").unwrap();

        let config = DistributionConfig {
            min_support: Some(50.0),
            ..DistributionConfig::default()
        };
        let dists = DistributionBuilder::new(&schema)
            .with_config(config)
            .build(&tree, Metric::Red);
        assert_eq!(dists.get(genus).unwrap().len(), 2);
        assert_eq!(dists.observations().len(), 4);

        let config = DistributionConfig {
            trusted_taxa: Some(["f__F1", "g__G1", "g__G2"].map(String::from).into()),
            ..DistributionConfig::default()
        };
        let dists = DistributionBuilder::new(&schema)
            .with_config(config)
            .build(&tree, Metric::Red);
        assert_eq!(dists.get(genus).unwrap().len(), 2);
    }

    #[test]
    fn test_min_children_filter() {
        let schema = RankSchema::gtdb();
        let tree = annotated_tree();
        let config = DistributionConfig {
            min_children: 2,
            ..DistributionConfig::default()
        };
        let dists = DistributionBuilder::new(&schema)
            .with_config(config)
            .build(&tree, Metric::Red);
        // f__F1 has two named genera, each genus has no named species
        let family = schema.rank_of_prefix("f__").unwrap();
        assert_eq!(dists.get(family).unwrap().len(), 1);
        assert!(dists.get(schema.rank_of_prefix("g__").unwrap()).is_none());
    }

    #[test]
    fn test_mean_branch_length_metric() {
        let schema = RankSchema::gtdb();
        let tree = annotated_tree();
        let dists = DistributionBuilder::new(&schema).build(&tree, Metric::MeanBranchLength);
        let genus = schema.rank_of_prefix("g__").unwrap();
        assert_eq!(dists.get(genus).unwrap().values(), &[0.1, 0.1, 0.2]);
    }
}
