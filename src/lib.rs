//! # phylorank
//!
//! A library for assigning taxonomic ranks to the nodes of a phylogenetic
//! tree using relative evolutionary divergence (RED).
//!
//! Branch lengths alone are a poor guide to rank: lineages evolve at
//! different rates, so clades of the same rank sit at very different
//! absolute depths. RED normalises each node's position between the root
//! (0) and its descendant tips (1), which makes depths comparable across
//! the tree.
//!
//! ## Features
//!
//! - **RED**: one bottom-up and one top-down pass over the tree
//! - **Rank distributions**: per-rank RED or branch length statistics with
//!   trusted-taxa, support and child-count filters
//! - **Outliers**: taxa falling outside a percentile band of their rank
//! - **Thresholds**: fixed per-rank cuts, or the branch length cut agreeing
//!   best with an existing taxonomy
//! - **Decoration**: percentile, RED and predicted rank written onto labels
//! - **Taxonomy tools**: extraction from trees, validation, summaries
//!
//! ## Example
//!
//! ```rust
//! use phylorank::{Decorator, DistributionBuilder, Metric, RankSchema, RankThresholds, RedEngine};
//! use phylorank::parsing::newick::{parse_newick_str, to_newick};
//!
//! let mut tree = parse_newick_str("((A:1,B:1)g__X:0.5,(C:1,D:1)g__Y:1);").unwrap();
//! let red = RedEngine::new().compute(&mut tree).unwrap();
//!
//! let schema = RankSchema::gtdb();
//! let dists = DistributionBuilder::new(&schema).build(&tree, Metric::Red);
//! let thresholds = RankThresholds::from_distributions(&dists);
//! Decorator::new(&schema, &dists, &thresholds).decorate(&mut tree, &red);
//!
//! assert!(to_newick(&tree).contains("RED="));
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Tree, rank schema, label codec and taxonomy
//! - [`divergence`]: RED, rank distributions, outliers, thresholds, decoration
//! - [`parsing`]: Newick, taxonomy and list readers and writers
//! - [`cli`]: Command-line interface implementation

pub mod cli;
pub mod core;
pub mod divergence;
pub mod parsing;
pub mod utils;

// Re-export commonly used types for convenience
pub use core::label::{decode, encode, DecodedLabel};
pub use core::taxonomy::Taxonomy;
pub use core::tree::{NodeId, Tree};
pub use core::types::*;
pub use divergence::{
    Decorator, DistributionBuilder, Metric, OutlierDetector, RankThresholds, RedEngine, RootPolicy,
};
