//! Relative evolutionary divergence (RED) and everything built on it.
//!
//! The analysis runs as a short, fixed sequence of whole-tree passes:
//!
//! | Stage | Type | Output |
//! |-------|------|--------|
//! | RED | [`RedEngine`] | one value in `[0, 1]` per node |
//! | Rank distributions | [`DistributionBuilder`] | per-rank value lists and statistics |
//! | Outliers | [`OutlierDetector`] | within/below/above classification per named node |
//! | Thresholds | [`RankThresholds`], [`optimal_threshold`] | predicted ranks and crossing lineages |
//! | Decoration | [`Decorator`], [`BranchLengthDecorator`] | rewritten node labels |
//!
//! Each stage reads the output of the previous one and never mutates it,
//! except the decorators, which rewrite labels in place.
//!
//! ## Example
//!
//! ```rust
//! use phylorank::core::types::RankSchema;
//! use phylorank::divergence::{DistributionBuilder, Metric, RedEngine};
//! use phylorank::parsing::newick::parse_newick_str;
//!
//! let mut tree = parse_newick_str("((A:1,B:1)g__X:0.5,(C:1,D:1)g__Y:1);").unwrap();
//! let red = RedEngine::new().compute(&mut tree).unwrap();
//! assert_eq!(red.get(tree.root()), Some(0.0));
//!
//! let schema = RankSchema::gtdb();
//! let dists = DistributionBuilder::new(&schema).build(&tree, Metric::Red);
//! let genus = schema.rank_of_prefix("g__").unwrap();
//! assert_eq!(dists.get(genus).map(|d| d.len()), Some(2));
//! ```

pub mod decorate;
pub mod distribution;
pub mod outliers;
pub mod red;
pub mod thresholds;

use thiserror::Error;

use crate::core::tree::TreeError;

pub use decorate::{DecorationConfig, Decorator};
pub use distribution::{
    DistributionBuilder, DistributionConfig, Metric, RankDistribution, RankDistributions,
    TaxonObservation,
};
pub use outliers::{OutlierAssessment, OutlierClass, OutlierConfig, OutlierDetector, PercentileBand};
pub use red::{RedEngine, RedValues, RootPolicy, SubtreeStats};
pub use thresholds::{
    best_agreement, CategoryIndex, crossing_nodes, evaluate_threshold, optimal_threshold, scan_thresholds,
    BranchLengthDecorationConfig, BranchLengthDecorator, RankThresholds, ThresholdAgreement,
};

#[derive(Error, Debug)]
pub enum DivergenceError {
    #[error("Tree root has {children} children; a fixed root requires a bifurcating root")]
    UnrootedTree { children: usize },

    #[error("Outgroup not found in tree: {0}")]
    OutgroupNotFound(String),

    #[error("Cannot root on outgroup: {0}")]
    Reroot(#[from] TreeError),

    #[error("Unknown rank prefix: {0}")]
    UnknownRank(String),

    #[error("Tree has no branches")]
    EmptyTree,
}
