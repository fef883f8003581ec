//! Clade-level comparison of two trees over the same leaves.
//!
//! Named clades are matched by taxon name and their memberships compared;
//! unnamed clades are matched by leaf set. Memberships are always restricted
//! to leaves present in both trees.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::tree::{NodeId, Tree};

/// Filters applied to the clades of both trees.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Ignore clades with a support value below this; unsupported nodes pass
    pub min_support: f64,
    /// Ignore clades with fewer shared leaves than this
    pub min_taxa: usize,
    /// Only compare clades carrying a taxon name
    pub named_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CladeStatus {
    /// Same clade in both trees
    Shared,
    /// Named in both trees with different members
    MembersDiffer,
    /// Only the first tree has this clade
    OnlyFirst,
    /// Only the second tree has this clade
    OnlySecond,
}

impl CladeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::MembersDiffer => "members_differ",
            Self::OnlyFirst => "only_first",
            Self::OnlySecond => "only_second",
        }
    }
}

/// One clade and how it compares across the two trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CladeDiff {
    /// Taxon name, or the first and last member for unnamed clades
    pub clade: String,
    pub status: CladeStatus,
    pub taxa_first: usize,
    pub taxa_second: usize,
    pub support_first: Option<f64>,
    pub support_second: Option<f64>,
    /// Members in the first tree's clade but not the second's
    pub only_first: Vec<String>,
    /// Members in the second tree's clade but not the first's
    pub only_second: Vec<String>,
}

/// Result of [`tree_diff`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeDiff {
    pub leaves_only_first: Vec<String>,
    pub leaves_only_second: Vec<String>,
    pub clades: Vec<CladeDiff>,
}

impl TreeDiff {
    #[must_use]
    pub fn count(&self, status: CladeStatus) -> usize {
        self.clades.iter().filter(|c| c.status == status).count()
    }
}

struct Clade {
    members: BTreeSet<String>,
    support: Option<f64>,
}

/// Clades of one tree passing the filters, split into named and unnamed.
#[derive(Default)]
struct CladeSet {
    named: BTreeMap<String, Clade>,
    unnamed: Vec<Clade>,
    all: HashSet<BTreeSet<String>>,
}

fn leaf_labels(tree: &Tree) -> BTreeSet<String> {
    tree.leaves()
        .into_iter()
        .filter_map(|l| tree[l].label())
        .map(str::to_string)
        .collect()
}

fn collect_clades(tree: &Tree, common: &BTreeSet<String>, options: &DiffOptions) -> CladeSet {
    let mut set = CladeSet::default();
    for id in tree.internal_nodes() {
        if tree.is_root(id) {
            continue;
        }
        let label = tree[id].decoded_label();
        let support = label.support_value();
        if support.is_some_and(|s| s < options.min_support) {
            continue;
        }

        let members = clade_members(tree, id, common);
        if members.len() < options.min_taxa.max(1) {
            continue;
        }

        let taxa = label.taxa();
        if taxa.is_empty() {
            if options.named_only {
                continue;
            }
            set.all.insert(members.clone());
            set.unnamed.push(Clade { members, support });
            continue;
        }

        set.all.insert(members.clone());
        for taxon in taxa {
            if set.named.contains_key(taxon) {
                debug!("Taxon {taxon} appears on more than one node; keeping the first");
                continue;
            }
            set.named.insert(
                taxon.to_string(),
                Clade {
                    members: members.clone(),
                    support,
                },
            );
        }
    }
    set
}

fn clade_members(tree: &Tree, id: NodeId, common: &BTreeSet<String>) -> BTreeSet<String> {
    tree.leaves_under(id)
        .into_iter()
        .filter_map(|l| tree[l].label())
        .filter(|l| common.contains(*l))
        .map(str::to_string)
        .collect()
}

fn unnamed_name(members: &BTreeSet<String>) -> String {
    match (members.first(), members.last()) {
        (Some(first), Some(last)) if first != last => format!("[{first}..{last}]"),
        (Some(first), _) => format!("[{first}]"),
        _ => "[]".to_string(),
    }
}

fn one_sided(clade: &Clade, name: String, status: CladeStatus) -> CladeDiff {
    let (taxa_first, taxa_second, support_first, support_second) = match status {
        CladeStatus::OnlySecond => (0, clade.members.len(), None, clade.support),
        _ => (clade.members.len(), 0, clade.support, None),
    };
    CladeDiff {
        clade: name,
        status,
        taxa_first,
        taxa_second,
        support_first,
        support_second,
        only_first: Vec::new(),
        only_second: Vec::new(),
    }
}

/// Compare the clades of two trees.
///
/// Named clades present in both trees are `Shared` when their memberships
/// agree and `MembersDiffer` otherwise. An unnamed clade is `Shared` when any
/// clade of the other tree has the same members. Leaves found in only one
/// tree are reported and left out of every membership.
#[must_use]
pub fn tree_diff(first: &Tree, second: &Tree, options: &DiffOptions) -> TreeDiff {
    let leaves_first = leaf_labels(first);
    let leaves_second = leaf_labels(second);
    let common: BTreeSet<String> = leaves_first.intersection(&leaves_second).cloned().collect();
    let leaves_only_first: Vec<String> = leaves_first.difference(&common).cloned().collect();
    let leaves_only_second: Vec<String> = leaves_second.difference(&common).cloned().collect();
    for leaf in &leaves_only_first {
        warn!("Leaf {leaf} is only in the first tree");
    }
    for leaf in &leaves_only_second {
        warn!("Leaf {leaf} is only in the second tree");
    }

    let a = collect_clades(first, &common, options);
    let b = collect_clades(second, &common, options);

    let mut clades = Vec::new();
    for (name, clade) in &a.named {
        let Some(other) = b.named.get(name) else {
            clades.push(one_sided(clade, name.clone(), CladeStatus::OnlyFirst));
            continue;
        };
        let only_first: Vec<String> = clade.members.difference(&other.members).cloned().collect();
        let only_second: Vec<String> = other.members.difference(&clade.members).cloned().collect();
        let status = if only_first.is_empty() && only_second.is_empty() {
            CladeStatus::Shared
        } else {
            CladeStatus::MembersDiffer
        };
        clades.push(CladeDiff {
            clade: name.clone(),
            status,
            taxa_first: clade.members.len(),
            taxa_second: other.members.len(),
            support_first: clade.support,
            support_second: other.support,
            only_first,
            only_second,
        });
    }
    for (name, clade) in &b.named {
        if !a.named.contains_key(name) {
            clades.push(one_sided(clade, name.clone(), CladeStatus::OnlySecond));
        }
    }

    for clade in &a.unnamed {
        let name = unnamed_name(&clade.members);
        if b.all.contains(&clade.members) {
            let support_second = b
                .unnamed
                .iter()
                .find(|c| c.members == clade.members)
                .and_then(|c| c.support);
            clades.push(CladeDiff {
                clade: name,
                status: CladeStatus::Shared,
                taxa_first: clade.members.len(),
                taxa_second: clade.members.len(),
                support_first: clade.support,
                support_second,
                only_first: Vec::new(),
                only_second: Vec::new(),
            });
        } else {
            clades.push(one_sided(clade, name, CladeStatus::OnlyFirst));
        }
    }
    for clade in &b.unnamed {
        if !a.all.contains(&clade.members) {
            clades.push(one_sided(clade, unnamed_name(&clade.members), CladeStatus::OnlySecond));
        }
    }

    let diff = TreeDiff {
        leaves_only_first,
        leaves_only_second,
        clades,
    };
    info!(
        "Compared {} clades: {} shared, {} with different members, {} only in first, {} only in second",
        diff.clades.len(),
        diff.count(CladeStatus::Shared),
        diff.count(CladeStatus::MembersDiffer),
        diff.count(CladeStatus::OnlyFirst),
        diff.count(CladeStatus::OnlySecond),
    );
    diff
}
