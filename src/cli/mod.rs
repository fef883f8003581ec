//! Command-line interface for phylorank.
//!
//! This module implements the CLI using clap. Available commands:
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `outliers` | RED, rank distributions and outlier table |
//! | `scale` | rescale branch lengths to RED increments |
//! | `decorate` | write percentile, RED and predicted rank onto labels |
//! | `pull` | extract taxonomy strings from a decorated tree |
//! | `validate` | check a taxonomy file for consistency |
//! | `append` | append taxonomy strings to leaf labels |
//! | `taxon_stats` | named descendants per taxon |
//! | `rank_res` | taxonomic resolution of named groups |
//! | `rd_ranks` | lineages crossing fixed RED thresholds |
//! | `bl_dist` | mean branch length distribution per rank |
//! | `bl_optimal` | branch length threshold agreeing best with the taxonomy |
//! | `bl_decorate` | name lineages at a branch length threshold |
//! | `bl_table` | lineage counts over increasing branch length thresholds |
//! | `tree_diff` | clades shared by, differing between, or unique to two trees |
//!
//! ## Usage
//!
//! ```text
//! # RED outliers against a trusted baseline
//! phylorank outliers gtdb.tree out/ --trusted-taxa-file trusted.txt --fixed-root
//!
//! # Decorate with explicit RED thresholds
//! phylorank decorate gtdb.tree decorated.tree --thresholds 'p__=0.35,c__=0.5'
//!
//! # JSON output for scripting
//! phylorank validate taxonomy.tsv --format json
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::core::taxonomy::Taxonomy;
use crate::core::tree::Tree;
use crate::core::types::{Rank, RankSchema};
use crate::divergence::{PercentileBand, RankDistributions, RootPolicy};
use crate::parsing::lists::read_taxa_list;
use crate::parsing::newick::read_tree_file;
use crate::parsing::taxonomy::read_taxonomy_file;
use crate::utils::format_optional;
use crate::utils::validation::check_file_exists;

pub mod branch_length;
pub mod decorate;
pub mod outliers;
pub mod rd_ranks;
pub mod taxonomy;
pub mod tree_diff;

#[derive(Parser)]
#[command(name = "phylorank")]
#[command(version)]
#[command(about = "Assign taxonomic ranks to tree nodes from relative evolutionary divergence")]
#[command(
    long_about = "phylorank computes the relative evolutionary divergence (RED) of every node in a rooted tree.\n\nIt builds per-rank RED distributions from named clades and provides:\n- Outlier tables for taxa whose placement is atypical for their rank\n- Rank predictions and label decoration from RED or branch length thresholds\n- Taxonomy extraction, validation and summary tables"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Commands {
    /// Create information for identifying taxonomic outliers
    Outliers(outliers::OutliersArgs),

    /// Scale branch lengths so root-to-node distance equals RED
    Scale(outliers::ScaleArgs),

    /// Decorate internal nodes with RED, percentile and predicted rank
    Decorate(decorate::DecorateArgs),

    /// Pull taxonomy strings from a decorated tree
    Pull(taxonomy::PullArgs),

    /// Validate a taxonomy file
    Validate(taxonomy::ValidateArgs),

    /// Append taxonomy strings to extant leaf labels
    Append(taxonomy::AppendArgs),

    /// Summary statistics of named descendants per taxon
    TaxonStats(taxonomy::TaxonStatsArgs),

    /// Taxonomic resolution of named groups at each rank
    RankRes(taxonomy::RankResArgs),

    /// Number of lineages crossing fixed RED thresholds
    RdRanks(rd_ranks::RdRanksArgs),

    /// Distribution of mean branch length to extant taxa at each rank
    BlDist(branch_length::BlDistArgs),

    /// Branch length threshold with best agreement to the taxonomy
    BlOptimal(branch_length::BlOptimalArgs),

    /// Decorate a tree at a mean branch length threshold
    BlDecorate(branch_length::BlDecorateArgs),

    /// Number of lineages for increasing mean branch length thresholds
    BlTable(branch_length::BlTableArgs),

    /// Compare the clades of two trees
    TreeDiff(tree_diff::TreeDiffArgs),
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Tsv,
}

/// Rooting options shared by commands that compute RED.
#[derive(clap::Args, Debug, Clone)]
pub struct RootingArgs {
    /// Use the root as given and require it to be a bifurcation. Without
    /// this flag or --outgroup, RED is the median over rootings on each
    /// named phylum
    #[arg(long, conflicts_with = "outgroup")]
    pub fixed_root: bool,

    /// Reroot on the edge above the node carrying this taxon
    #[arg(long)]
    pub outgroup: Option<String>,
}

impl RootingArgs {
    #[must_use]
    pub fn policy(&self) -> RootPolicy {
        match (&self.outgroup, self.fixed_root) {
            (Some(taxon), _) => RootPolicy::Outgroup(taxon.clone()),
            (None, true) => RootPolicy::Fixed,
            (None, false) => RootPolicy::MedianOverPhyla,
        }
    }
}

pub(crate) fn load_tree(path: &Path) -> anyhow::Result<Tree> {
    check_file_exists(path)?;
    let tree = read_tree_file(path)?;
    tracing::info!("Read tree with {} leaves from {}", tree.num_leaves(), path.display());
    Ok(tree)
}

/// Taxonomy from a file if given, otherwise implied by the tree labels.
pub(crate) fn load_taxonomy(
    path: Option<&Path>,
    tree: &Tree,
    schema: &RankSchema,
) -> anyhow::Result<Taxonomy> {
    match path {
        Some(path) => {
            check_file_exists(path)?;
            let taxonomy = read_taxonomy_file(path)?;
            tracing::info!("Read taxonomy for {} extant taxa", taxonomy.len());
            report_leaf_coverage(&taxonomy, tree);
            Ok(taxonomy)
        }
        None => Ok(Taxonomy::from_tree(tree, schema, true)),
    }
}

/// Warn about every leaf without a taxonomy entry and every entry without
/// a leaf, then log the totals.
pub(crate) fn report_leaf_coverage(taxonomy: &Taxonomy, tree: &Tree) {
    let coverage = taxonomy.leaf_coverage(tree);
    if coverage.is_complete() {
        return;
    }
    for id in &coverage.missing_from_taxonomy {
        tracing::warn!("Leaf {id} has no entry in the taxonomy file");
    }
    for id in &coverage.missing_from_tree {
        tracing::warn!("Taxonomy entry {id} does not match any leaf in the tree");
    }
    tracing::info!(
        "{} leaves lack a taxonomy entry; {} taxonomy entries are not in the tree",
        coverage.missing_from_taxonomy.len(),
        coverage.missing_from_tree.len()
    );
}

pub(crate) fn load_taxa_list(
    path: Option<&Path>,
) -> anyhow::Result<Option<std::collections::BTreeSet<String>>> {
    path.map(|p| {
        check_file_exists(p)?;
        let taxa = read_taxa_list(p)?;
        tracing::info!("Read {} taxa from {}", taxa.len(), p.display());
        Ok(taxa)
    })
    .transpose()
}

/// Resolve a rank given as prefix (`g__`), bare letter (`g`) or label (`genus`).
pub(crate) fn parse_rank(schema: &RankSchema, value: &str) -> anyhow::Result<Rank> {
    let value = value.trim();
    schema
        .ranks()
        .find(|&r| {
            let prefix = schema.prefix(r);
            value == prefix
                || value == prefix.trim_end_matches('_')
                || value.eq_ignore_ascii_case(schema.label(r))
        })
        .with_context(|| format!("Unknown rank: {value}"))
}

pub(crate) fn create_output(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write per-rank summary statistics as TSV.
pub(crate) fn write_distribution_table(
    path: &Path,
    distributions: &RankDistributions,
    schema: &RankSchema,
    band: PercentileBand,
) -> anyhow::Result<()> {
    let mut out = create_output(path)?;
    writeln!(
        out,
        "Rank\tTaxa\tMean\tStd. dev.\tMedian\tPercentile {}\tPercentile {}\tMin\tMax",
        band.lower, band.upper
    )?;
    for (rank, dist) in distributions.iter() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            schema.label(rank),
            dist.len(),
            format_optional(dist.mean(), 4),
            format_optional(dist.std_dev(), 4),
            format_optional(dist.median(), 4),
            format_optional(dist.percentile(band.lower), 4),
            format_optional(dist.percentile(band.upper), 4),
            format_optional(dist.min(), 4),
            format_optional(dist.max(), 4),
        )?;
    }
    out.flush()?;
    Ok(())
}
