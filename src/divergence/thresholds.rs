//! Rank thresholds: fixed cut values per rank, the lineages crossing a cut,
//! and the single cut that best agrees with an existing taxonomy.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::label;
use crate::core::taxonomy::Taxonomy;
use crate::core::tree::{NodeId, Tree};
use crate::core::types::{Rank, RankSchema};
use crate::divergence::distribution::{Metric, RankDistributions};
use crate::divergence::red::subtree_stats;
use crate::divergence::DivergenceError;
use crate::utils::count_to_f64;

/// Lower RED bound of each rank band.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankThresholds {
    cuts: BTreeMap<Rank, f64>,
}

impl RankThresholds {
    /// Build from a rank prefix to cut value map, e.g. `{"p__": 0.35}`.
    ///
    /// # Errors
    ///
    /// Returns `DivergenceError::UnknownRank` for a prefix outside the schema.
    pub fn from_prefix_map(
        map: &BTreeMap<String, f64>,
        schema: &RankSchema,
    ) -> Result<Self, DivergenceError> {
        let cuts = map
            .iter()
            .map(|(prefix, &cut)| {
                schema
                    .rank_of_prefix(prefix.trim())
                    .map(|rank| (rank, cut))
                    .ok_or_else(|| DivergenceError::UnknownRank(prefix.clone()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { cuts })
    }

    /// Derive cuts from the medians of rank distributions.
    ///
    /// The cut of a rank is the midpoint between its median and the median
    /// of the nearest more general rank with data (0 if there is none).
    #[must_use]
    pub fn from_distributions(distributions: &RankDistributions) -> Self {
        let mut cuts = BTreeMap::new();
        let mut previous_median = 0.0;
        for (rank, dist) in distributions.iter() {
            let Some(median) = dist.median() else {
                continue;
            };
            cuts.insert(rank, (previous_median + median) / 2.0);
            previous_median = median;
        }
        Self { cuts }
    }

    #[must_use]
    pub fn get(&self, rank: Rank) -> Option<f64> {
        self.cuts.get(&rank).copied()
    }

    /// Cuts ordered from the most general rank.
    pub fn iter(&self) -> impl Iterator<Item = (Rank, f64)> + '_ {
        self.cuts.iter().map(|(r, c)| (*r, *c))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Most specific rank whose cut is at or below `value`.
    #[must_use]
    pub fn predict(&self, value: f64) -> Option<Rank> {
        self.cuts
            .iter()
            .filter(|(_, &cut)| cut <= value)
            .map(|(&rank, _)| rank)
            .max()
    }

    /// Lineages crossing each rank cut, using the RED stored on the nodes.
    #[must_use]
    pub fn crossing_lineages(&self, tree: &Tree) -> Vec<(Rank, f64, Vec<NodeId>)> {
        let values = Metric::Red.node_values(tree);
        self.iter()
            .map(|(rank, cut)| (rank, cut, crossing_nodes(tree, &values, Metric::Red, cut)))
            .collect()
    }
}

/// Nodes where a lineage crosses threshold `t` on the way from the root.
///
/// For RED a node crosses when its value is at least `t` and its parent's
/// is below `t`. For mean branch length, which shrinks towards the leaves,
/// a node crosses when its value is at most `t` and its parent's is above.
/// The root crosses whenever its own value satisfies the bound.
#[must_use]
pub fn crossing_nodes(tree: &Tree, values: &[Option<f64>], metric: Metric, t: f64) -> Vec<NodeId> {
    tree.preorder()
        .into_iter()
        .filter(|&id| {
            let Some(value) = values[id] else {
                return false;
            };
            let parent = tree[id].parent().and_then(|p| values[p]);
            match metric {
                Metric::Red => value >= t && parent.map_or(true, |p| p < t),
                Metric::MeanBranchLength => value <= t && parent.map_or(true, |p| p > t),
            }
        })
        .collect()
}

/// Categories of the leaves below every node, for counting lineages per
/// leaf category.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    names: Vec<String>,
    below: Vec<BTreeSet<usize>>,
}

impl CategoryIndex {
    /// Index `categories` (leaf label to category) over `tree`.
    ///
    /// Leaves without a category contribute nothing.
    #[must_use]
    pub fn new(tree: &Tree, categories: &BTreeMap<String, String>) -> Self {
        let names: Vec<String> = categories
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut below = vec![BTreeSet::new(); tree.arena_len()];
        let mut uncategorised = 0;
        for id in tree.postorder() {
            if tree[id].is_leaf() {
                let category = tree[id].label().and_then(|l| categories.get(l));
                match category.and_then(|c| names.binary_search(c).ok()) {
                    Some(index) => {
                        below[id].insert(index);
                    }
                    None => uncategorised += 1,
                }
            } else {
                let merged: BTreeSet<usize> = tree[id]
                    .children()
                    .iter()
                    .flat_map(|&c| below[c].iter().copied())
                    .collect();
                below[id] = merged;
            }
        }
        if uncategorised > 0 {
            warn!("{uncategorised} leaves have no category");
        }
        Self { names, below }
    }

    /// Category names in sorted order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Per category, how many of `nodes` have at least one leaf of it.
    #[must_use]
    pub fn count(&self, nodes: &[NodeId]) -> Vec<usize> {
        let mut counts = vec![0; self.names.len()];
        for &node in nodes {
            for &index in &self.below[node] {
                counts[index] += 1;
            }
        }
        counts
    }
}

/// Agreement between the lineages crossing a threshold and a taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdAgreement {
    pub threshold: f64,
    pub correct: usize,
    pub incorrect: usize,
}

impl ThresholdAgreement {
    /// `correct / (correct + incorrect)`, undefined when nothing was assessed.
    #[must_use]
    pub fn precision(&self) -> Option<f64> {
        let total = self.correct + self.incorrect;
        (total > 0).then(|| count_to_f64(self.correct) / count_to_f64(total))
    }

    fn score(&self) -> i64 {
        i64::try_from(self.correct).unwrap_or(i64::MAX)
            - i64::try_from(self.incorrect).unwrap_or(i64::MAX)
    }
}

/// Taxa found among the leaves below a node, at one rank.
#[derive(Debug, Clone, PartialEq)]
enum Composition {
    Unassigned,
    Uniform { taxon: String, count: usize },
    Mixed,
}

impl Composition {
    fn merge(self, other: &Self) -> Self {
        match (self, other) {
            (Self::Mixed, _) | (_, Self::Mixed) => Self::Mixed,
            (Self::Unassigned, other) => other.clone(),
            (this, Self::Unassigned) => this,
            (Self::Uniform { taxon, count }, Self::Uniform { taxon: t, count: c }) => {
                if taxon == *t {
                    Self::Uniform {
                        taxon,
                        count: count + c,
                    }
                } else {
                    Self::Mixed
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Correct,
    Incorrect,
    Ignored,
}

/// Judges crossing lineages against the taxa of one rank.
struct AgreementModel {
    values: Vec<Option<f64>>,
    verdicts: Vec<Verdict>,
}

impl AgreementModel {
    /// A crossing node is correct when its leaves are exactly the leaves of
    /// one taxon, and incorrect when it holds classified leaves otherwise.
    fn new(tree: &Tree, taxonomy: &Taxonomy, rank: Rank, schema: &RankSchema, metric: Metric) -> Self {
        let mut compositions = vec![Composition::Unassigned; tree.arena_len()];
        let mut totals: BTreeMap<String, usize> = BTreeMap::new();

        for id in tree.postorder() {
            let node = &tree[id];
            compositions[id] = if node.is_leaf() {
                match node.label().and_then(|l| taxonomy.taxon_at(l, rank, schema)) {
                    Some(taxon) => {
                        *totals.entry(taxon.to_string()).or_insert(0) += 1;
                        Composition::Uniform {
                            taxon: taxon.to_string(),
                            count: 1,
                        }
                    }
                    None => Composition::Unassigned,
                }
            } else {
                node.children()
                    .iter()
                    .fold(Composition::Unassigned, |acc, &c| acc.merge(&compositions[c]))
            };
        }

        let verdicts = compositions
            .iter()
            .map(|composition| match composition {
                Composition::Uniform { taxon, count } if totals.get(taxon) == Some(count) => {
                    Verdict::Correct
                }
                Composition::Uniform { .. } | Composition::Mixed => Verdict::Incorrect,
                Composition::Unassigned => Verdict::Ignored,
            })
            .collect();

        Self {
            values: metric.node_values(tree),
            verdicts,
        }
    }

    fn evaluate(&self, tree: &Tree, metric: Metric, threshold: f64) -> ThresholdAgreement {
        let mut agreement = ThresholdAgreement {
            threshold,
            correct: 0,
            incorrect: 0,
        };
        for id in crossing_nodes(tree, &self.values, metric, threshold) {
            match self.verdicts[id] {
                Verdict::Correct => agreement.correct += 1,
                Verdict::Incorrect => agreement.incorrect += 1,
                Verdict::Ignored => {}
            }
        }
        agreement
    }
}

/// Agreement at a single threshold.
#[must_use]
pub fn evaluate_threshold(
    tree: &Tree,
    taxonomy: &Taxonomy,
    rank: Rank,
    schema: &RankSchema,
    metric: Metric,
    threshold: f64,
) -> ThresholdAgreement {
    AgreementModel::new(tree, taxonomy, rank, schema, metric).evaluate(tree, metric, threshold)
}

/// A change in the crossing set once the threshold passes `value`.
struct SweepEvent {
    value: f64,
    /// Applies only once the threshold is strictly greater than `value`
    strict: bool,
    correct: isize,
    incorrect: isize,
}

/// Agreement at every distinct metric value observed in the tree, in
/// ascending threshold order.
///
/// Each node is a crossing lineage over a single interval of thresholds,
/// so the scan sorts interval endpoints once and sweeps them.
#[must_use]
pub fn scan_thresholds(
    tree: &Tree,
    taxonomy: &Taxonomy,
    rank: Rank,
    schema: &RankSchema,
    metric: Metric,
) -> Vec<ThresholdAgreement> {
    let model = AgreementModel::new(tree, taxonomy, rank, schema, metric);

    let mut events = Vec::new();
    let mut candidates = Vec::new();
    for id in tree.preorder() {
        let Some(value) = model.values[id] else {
            continue;
        };
        candidates.push(value);

        let (correct, incorrect) = match model.verdicts[id] {
            Verdict::Correct => (1, 0),
            Verdict::Incorrect => (0, 1),
            Verdict::Ignored => continue,
        };
        let parent = tree[id].parent().and_then(|p| model.values[p]);

        // Active for thresholds in [value, parent) or (parent, value]
        let (start, end, strict) = match metric {
            Metric::MeanBranchLength => (value, parent.unwrap_or(f64::INFINITY), false),
            Metric::Red => (parent.unwrap_or(f64::NEG_INFINITY), value, true),
        };
        if start >= end {
            continue;
        }
        events.push(SweepEvent {
            value: start,
            strict,
            correct,
            incorrect,
        });
        events.push(SweepEvent {
            value: end,
            strict,
            correct: -correct,
            incorrect: -incorrect,
        });
    }

    candidates.sort_by(f64::total_cmp);
    candidates.dedup();
    events.sort_by(|a, b| a.value.total_cmp(&b.value).then(a.strict.cmp(&b.strict)));

    let mut scan = Vec::with_capacity(candidates.len());
    let (mut correct, mut incorrect) = (0isize, 0isize);
    let mut pending = events.iter().peekable();
    for threshold in candidates {
        while let Some(event) = pending.next_if(|e| {
            e.value < threshold || (e.value == threshold && !e.strict)
        }) {
            correct += event.correct;
            incorrect += event.incorrect;
        }
        scan.push(ThresholdAgreement {
            threshold,
            correct: correct.unsigned_abs(),
            incorrect: incorrect.unsigned_abs(),
        });
    }

    debug!("Evaluated {} candidate thresholds", scan.len());
    scan
}

/// Threshold maximising `correct - incorrect`, preferring the smallest on ties.
///
/// Returns `None` for a tree without candidate values.
#[must_use]
pub fn optimal_threshold(
    tree: &Tree,
    taxonomy: &Taxonomy,
    rank: Rank,
    schema: &RankSchema,
    metric: Metric,
) -> Option<ThresholdAgreement> {
    best_agreement(&scan_thresholds(tree, taxonomy, rank, schema, metric))
}

/// Best entry of a threshold scan; earlier entries win ties.
#[must_use]
pub fn best_agreement(scan: &[ThresholdAgreement]) -> Option<ThresholdAgreement> {
    let mut best: Option<ThresholdAgreement> = None;
    for agreement in scan {
        if best.map_or(true, |b| agreement.score() > b.score()) {
            best = Some(*agreement);
        }
    }
    best
}

/// Options for naming lineages at a mean branch length threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchLengthDecorationConfig {
    pub threshold: f64,
    pub rank: Rank,
    /// Leave lineages already named at `rank` untouched
    pub retain_named_lineages: bool,
    /// Append the new taxon to an existing taxon instead of replacing it
    pub keep_labels: bool,
    /// Collapse each decorated lineage to a single leaf
    pub prune: bool,
}

impl BranchLengthDecorationConfig {
    #[must_use]
    pub fn new(threshold: f64, rank: Rank) -> Self {
        Self {
            threshold,
            rank,
            retain_named_lineages: false,
            keep_labels: false,
            prune: false,
        }
    }
}

/// Names each internal lineage crossing a mean branch length threshold
/// after the most common taxon among its leaves.
pub struct BranchLengthDecorator<'a> {
    schema: &'a RankSchema,
    taxonomy: &'a Taxonomy,
    config: BranchLengthDecorationConfig,
}

impl<'a> BranchLengthDecorator<'a> {
    #[must_use]
    pub fn new(
        schema: &'a RankSchema,
        taxonomy: &'a Taxonomy,
        config: BranchLengthDecorationConfig,
    ) -> Self {
        Self {
            schema,
            taxonomy,
            config,
        }
    }

    /// Decorate the tree in place, returning the number of lineages named.
    pub fn decorate(&self, tree: &mut Tree) -> usize {
        let stats = subtree_stats(tree);
        let values = Metric::MeanBranchLength.node_values(tree);
        let crossing = crossing_nodes(tree, &values, Metric::MeanBranchLength, self.config.threshold);

        let named = self.named_at_rank(tree);
        let mut named_below = vec![false; tree.arena_len()];
        for id in tree.postorder() {
            named_below[id] = tree[id]
                .children()
                .iter()
                .any(|&c| named[c] || named_below[c]);
        }

        let mut removed = vec![false; tree.arena_len()];
        let mut decorated = 0;
        for id in crossing {
            if removed[id] || tree[id].is_leaf() || tree.is_root(id) {
                continue;
            }
            if self.config.retain_named_lineages
                && (named[id] || named_below[id] || tree.ancestors(id).any(|a| named[a]))
            {
                continue;
            }
            let Some(taxon) = self.majority_taxon(tree, id) else {
                debug!("No classified leaves below node {id}");
                continue;
            };
            if tree[id].has_malformed_label() {
                warn!(
                    "Not naming node {id} as {taxon}: cannot parse label '{}'",
                    tree[id].label().unwrap_or_default()
                );
                continue;
            }

            if self.config.prune {
                for d in tree.preorder_from(id).into_iter().skip(1) {
                    removed[d] = true;
                }
                tree.collapse_to_leaf(id);
                let node = &mut tree[id];
                node.branch_length = Some(node.length() + stats[id].mean_dist);
                node.label = Some(taxon);
            } else {
                let decoded = tree[id].decoded_label();
                let taxon = match decoded.taxon() {
                    Some(existing) if self.config.keep_labels => format!("{existing}; {taxon}"),
                    _ => taxon,
                };
                tree[id].label = Some(label::encode(
                    decoded.support(),
                    Some(&taxon),
                    decoded.auxiliary(),
                ));
            }
            decorated += 1;
        }

        info!(
            "Named {decorated} lineages at mean branch length {}",
            self.config.threshold
        );
        decorated
    }

    fn named_at_rank(&self, tree: &Tree) -> Vec<bool> {
        let mut named = vec![false; tree.arena_len()];
        for id in tree.preorder() {
            named[id] = tree[id]
                .decoded_label()
                .taxa()
                .iter()
                .any(|t| self.schema.rank_of_taxon(t) == Some(self.config.rank));
        }
        named
    }

    /// Most common taxon at the configured rank among the leaves below `id`;
    /// ties go to the alphabetically first taxon.
    fn majority_taxon(&self, tree: &Tree, id: NodeId) -> Option<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for leaf in tree.leaves_under(id) {
            if let Some(taxon) = tree[leaf]
                .label()
                .and_then(|l| self.taxonomy.taxon_at(l, self.config.rank, self.schema))
            {
                *counts.entry(taxon).or_insert(0) += 1;
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for (taxon, count) in counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((taxon, count));
            }
        }
        best.map(|(taxon, _)| taxon.to_string())
    }
}
