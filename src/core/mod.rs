//! Core data types for phylogenetic rank analysis.
//!
//! This module provides the fundamental types used throughout the library:
//!
//! - [`Tree`](tree::Tree): Arena-backed rooted tree with branch lengths and labels
//! - [`DecodedLabel`](label::DecodedLabel): Support / taxon / auxiliary parts of a node label
//! - [`Taxonomy`](taxonomy::Taxonomy): Leaf identifier to lineage mapping
//! - [`RankSchema`](types::RankSchema), [`Rank`](types::Rank): Ordered taxonomic ranks
//! - [`tree_diff`](diff::tree_diff): Clade-by-clade comparison of two trees
//!
//! ## Rank prefixes
//!
//! Taxon names are qualified with a short rank prefix:
//!
//! | Rank    | Prefix | Example              |
//! |---------|--------|----------------------|
//! | domain  | `d__`  | `d__Bacteria`        |
//! | phylum  | `p__`  | `p__Proteobacteria`  |
//! | class   | `c__`  | `c__Gammaproteobacteria` |
//! | order   | `o__`  | `o__Enterobacterales`|
//! | family  | `f__`  | `f__Enterobacteriaceae` |
//! | genus   | `g__`  | `g__Escherichia`     |
//! | species | `s__`  | `s__Escherichia coli`|
//!
//! A bare prefix (e.g. `g__`) marks an unnamed rank in a lineage.

pub mod diff;
pub mod label;
pub mod taxonomy;
pub mod tree;
pub mod types;
