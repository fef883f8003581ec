use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::warn;

use crate::core::tree::{NodeId, Tree};
use crate::core::types::{Rank, RankSchema};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("Taxonomy file does not contain an entry for {0}")]
    MissingEntry(String),

    #[error("Unknown rank prefix: {0}")]
    UnknownRank(String),
}

/// Identifiers present on only one side of a tree/taxonomy pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafCoverage {
    /// Leaf labels without a taxonomy entry
    pub missing_from_taxonomy: Vec<String>,
    /// Taxonomy entries without a matching leaf
    pub missing_from_tree: Vec<String>,
}

impl LeafCoverage {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_from_taxonomy.is_empty() && self.missing_from_tree.is_empty()
    }
}

/// Leaf identifier to rank-qualified lineage mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    /// Lineage per extant leaf, most general rank first
    lineages: BTreeMap<String, Vec<String>>,

    // === Pre-computed from lineages ===
    /// Lineage of each named taxon, ending with the taxon itself
    taxon_lineages: BTreeMap<String, Vec<String>>,
}

impl Taxonomy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_lineages(lineages: BTreeMap<String, Vec<String>>) -> Self {
        let mut taxonomy = Self {
            lineages,
            taxon_lineages: BTreeMap::new(),
        };
        taxonomy.rebuild_indexes();
        taxonomy
    }

    pub fn insert(&mut self, id: impl Into<String>, lineage: Vec<String>) {
        self.lineages.insert(id.into(), lineage);
        self.rebuild_indexes();
    }

    fn rebuild_indexes(&mut self) {
        self.taxon_lineages.clear();
        for lineage in self.lineages.values() {
            for (i, taxon) in lineage.iter().enumerate() {
                if !is_named(taxon) || self.taxon_lineages.contains_key(taxon) {
                    continue;
                }
                let path = lineage[..=i]
                    .iter()
                    .filter(|t| is_named(t))
                    .cloned()
                    .collect();
                self.taxon_lineages.insert(taxon.clone(), path);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&[String]> {
        self.lineages.get(id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.lineages.iter()
    }

    /// Lineage of a named taxon (most general first, ending with the taxon),
    /// as it first appears in the taxonomy.
    #[must_use]
    pub fn lineage_of_taxon(&self, taxon: &str) -> Option<&[String]> {
        self.taxon_lineages.get(taxon).map(Vec::as_slice)
    }

    /// Taxon at `rank` for leaf `id`, ignoring empty placeholders.
    #[must_use]
    pub fn taxon_at(&self, id: &str, rank: Rank, schema: &RankSchema) -> Option<&str> {
        self.get(id)?
            .get(rank.index())
            .map(String::as_str)
            .filter(|t| !schema.is_placeholder(t))
    }

    /// Number of leaves assigned to each named taxon at `rank`.
    #[must_use]
    pub fn leaf_counts_at(&self, rank: Rank, schema: &RankSchema) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for id in self.lineages.keys() {
            if let Some(taxon) = self.taxon_at(id, rank, schema) {
                *counts.entry(taxon.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Map each named taxon to its named child taxa at the next rank;
    /// species map to the identifiers of their leaves.
    #[must_use]
    pub fn taxon_children(&self, schema: &RankSchema) -> BTreeMap<String, BTreeSet<String>> {
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, lineage) in &self.lineages {
            for (i, taxon) in lineage.iter().enumerate() {
                if schema.is_placeholder(taxon) {
                    continue;
                }
                let entry = children.entry(taxon.clone()).or_default();
                match lineage.get(i + 1) {
                    Some(child) if !schema.is_placeholder(child) => {
                        entry.insert(child.clone());
                    }
                    Some(_) => {}
                    None => {
                        entry.insert(id.clone());
                    }
                }
            }
        }
        children
    }

    /// Read the taxonomy implied by taxon names on the ancestors of each leaf.
    ///
    /// Leaf identifiers are the raw leaf labels; lineages are ordered root to
    /// leaf and, when `fill_ranks` is set, padded to the full rank schema.
    #[must_use]
    pub fn from_tree(tree: &Tree, schema: &RankSchema, fill_ranks: bool) -> Self {
        let mut lineages = BTreeMap::new();
        for leaf in tree.leaves() {
            let Some(id) = tree[leaf].label() else {
                warn!("Skipping unlabeled leaf (node {leaf})");
                continue;
            };

            let mut path: Vec<NodeId> = tree.ancestors(leaf).collect();
            path.reverse();
            let taxa: Vec<String> = path
                .iter()
                .flat_map(|&n| {
                    tree[n]
                        .decoded_label()
                        .taxa()
                        .into_iter()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();

            let lineage = if fill_ranks {
                fill_missing_ranks(&taxa, schema)
            } else {
                taxa
            };
            lineages.insert(id.to_string(), lineage);
        }
        Self::from_lineages(lineages)
    }

    /// Compare leaf labels of `tree` with the identifiers in the taxonomy.
    #[must_use]
    pub fn leaf_coverage(&self, tree: &Tree) -> LeafCoverage {
        let leaves: BTreeSet<&str> = tree
            .leaves()
            .into_iter()
            .filter_map(|l| tree[l].label())
            .collect();
        LeafCoverage {
            missing_from_taxonomy: leaves
                .iter()
                .filter(|id| !self.lineages.contains_key(**id))
                .map(|id| (*id).to_string())
                .collect(),
            missing_from_tree: self
                .lineages
                .keys()
                .filter(|id| !leaves.contains(id.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Check every entry against the rank schema, collecting all problems.
    #[must_use]
    pub fn validate(&self, schema: &RankSchema, options: &ValidationOptions) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let species = schema.species().index();

        for (id, lineage) in &self.lineages {
            if options.check_all_ranks && lineage.len() != schema.len() {
                report
                    .incomplete_taxonomies
                    .push((id.clone(), lineage.join(";")));
            }

            if options.check_prefixes {
                for (rank, taxon) in schema.ranks().zip(lineage) {
                    if !taxon.starts_with(schema.prefix(rank)) {
                        report.invalid_prefixes.push((id.clone(), taxon.clone()));
                    }
                }
            }

            if options.check_species && species > 0 && lineage.len() == schema.len() {
                let genus = &lineage[species - 1];
                let name = &lineage[species];
                if !is_valid_species_name(name, genus, schema) {
                    report.invalid_species_names.push((id.clone(), name.clone()));
                }
            }

            if options.check_hierarchy {
                for pair in lineage.windows(2) {
                    if !schema.is_placeholder(&pair[1]) {
                        parents.entry(&pair[1]).or_default().insert(&pair[0]);
                    }
                }
            }
        }

        report.multiple_parents = parents
            .into_iter()
            .filter(|(_, p)| p.len() > 1)
            .map(|(taxon, p)| {
                (
                    taxon.to_string(),
                    p.into_iter().map(str::to_string).collect(),
                )
            })
            .collect();

        report
    }
}

fn is_named(taxon: &str) -> bool {
    // a bare rank prefix such as "g__" carries no name
    !taxon.trim().is_empty() && !taxon.trim().ends_with("__")
}

/// A species name must be binomial with a generic name matching its genus.
fn is_valid_species_name(species: &str, genus: &str, schema: &RankSchema) -> bool {
    if schema.is_placeholder(species) || schema.is_placeholder(genus) {
        return true;
    }
    let name = schema.strip_prefix(species);
    let generic = schema.strip_prefix(genus);
    match name.split_once(' ') {
        Some((first, specific)) => first == generic && !specific.trim().is_empty(),
        None => false,
    }
}

/// Pad a partial lineage to one entry per rank, inserting bare prefixes for
/// ranks that are not named. Taxa whose prefix is unknown are dropped.
#[must_use]
pub fn fill_missing_ranks(taxa: &[String], schema: &RankSchema) -> Vec<String> {
    let mut filled: Vec<String> = schema.ranks().map(|r| schema.prefix(r).to_string()).collect();
    for taxon in taxa {
        if let Some(rank) = schema.rank_of_taxon(taxon) {
            filled[rank.index()] = taxon.trim().to_string();
        }
    }
    filled
}

/// Which checks [`Taxonomy::validate`] performs.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct ValidationOptions {
    pub check_prefixes: bool,
    pub check_all_ranks: bool,
    pub check_hierarchy: bool,
    pub check_species: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_prefixes: true,
            check_all_ranks: true,
            check_hierarchy: true,
            check_species: true,
        }
    }
}

/// All problems found by [`Taxonomy::validate`], one list per class.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidationReport {
    /// (id, lineage) pairs without exactly one entry per rank
    pub incomplete_taxonomies: Vec<(String, String)>,
    /// (id, taxon) pairs whose prefix does not match the rank position
    pub invalid_prefixes: Vec<(String, String)>,
    /// (id, species) pairs with a malformed binomial
    pub invalid_species_names: Vec<(String, String)>,
    /// taxon -> distinct parents, for taxa with more than one parent
    pub multiple_parents: BTreeMap<String, BTreeSet<String>>,
}

impl ValidationReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.incomplete_taxonomies.len()
            + self.invalid_prefixes.len()
            + self.invalid_species_names.len()
            + self.multiple_parents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// An internal node carrying at least one rank-qualified taxon name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedNode {
    pub node: NodeId,
    /// Taxa on this node's label, most general first
    pub taxa: Vec<String>,
    /// Rank of the most specific taxon on the label
    pub rank: Rank,
    pub support: Option<f64>,
}

impl NamedNode {
    /// The most specific taxon on the label.
    #[must_use]
    pub fn lowest_taxon(&self) -> &str {
        self.taxa.last().map_or("", String::as_str)
    }
}

/// Internal nodes labeled with a taxon, paired with their lowest named rank.
///
/// Labels whose last taxon has no recognised rank prefix are skipped.
#[must_use]
pub fn named_nodes(tree: &Tree, schema: &RankSchema) -> Vec<NamedNode> {
    tree.internal_nodes()
        .into_iter()
        .filter_map(|id| {
            let label = tree[id].decoded_label();
            let taxon = label.taxon()?;
            let Some(rank) = schema.lowest_rank(taxon) else {
                warn!("Ignoring label with unrecognised rank prefix: {taxon}");
                return None;
            };
            Some(NamedNode {
                node: id,
                taxa: label.taxa().into_iter().map(str::to_string).collect(),
                rank,
                support: label.support_value(),
            })
        })
        .collect()
}
