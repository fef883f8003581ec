//! Commands working on mean branch length to extant taxa rather than RED.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::cli::{
    create_output, load_taxa_list, load_taxonomy, load_tree, parse_rank,
    write_distribution_table, OutputFormat,
};
use crate::core::types::RankSchema;
use crate::divergence::red::subtree_stats;
use crate::divergence::{
    best_agreement, crossing_nodes, scan_thresholds, BranchLengthDecorationConfig,
    BranchLengthDecorator, CategoryIndex, DistributionBuilder, DistributionConfig, Metric, PercentileBand,
};
use crate::parsing::lists::read_category_file;
use crate::parsing::newick::write_tree_file;
use crate::utils::format_optional;
use crate::utils::validation::{check_file_exists, make_sure_path_exists};

#[derive(Args)]
pub struct BlDistArgs {
    /// Input tree with labeled internal nodes
    pub input_tree: PathBuf,

    /// Directory for output files
    pub output_dir: PathBuf,

    /// Taxonomy for extant taxa (default: read from tree labels)
    #[arg(long)]
    pub taxonomy_file: Option<PathBuf>,

    /// Restrict distributions to lineages made up of these taxa
    #[arg(long)]
    pub trusted_taxa_file: Option<PathBuf>,

    /// Minimum named child taxa for a taxon to enter the distributions
    #[arg(long, default_value = "2")]
    pub min_children: usize,
}

#[derive(Args)]
pub struct BlOptimalArgs {
    /// Input tree
    pub input_tree: PathBuf,

    /// Rank to evaluate (prefix such as g__ or label such as genus)
    #[arg(long)]
    pub rank: String,

    /// Taxonomy for extant taxa (default: read from tree labels)
    #[arg(long)]
    pub taxonomy_file: Option<PathBuf>,

    /// Write agreement at every evaluated threshold to this file
    #[arg(long)]
    pub output_table: Option<PathBuf>,
}

#[derive(Args)]
pub struct BlDecorateArgs {
    /// Input tree
    pub input_tree: PathBuf,

    /// Decorated output tree
    pub output_tree: PathBuf,

    /// Mean branch length threshold
    #[arg(long)]
    pub threshold: f64,

    /// Rank to name lineages at (prefix such as g__ or label such as genus)
    #[arg(long)]
    pub rank: String,

    /// Taxonomy for extant taxa (default: read from tree labels)
    #[arg(long)]
    pub taxonomy_file: Option<PathBuf>,

    /// Leave lineages already named at the rank untouched
    #[arg(long)]
    pub retain_named_lineages: bool,

    /// Keep existing taxa, appending the new name
    #[arg(long)]
    pub keep_labels: bool,

    /// Collapse each named lineage to a single leaf
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args)]
pub struct BlTableArgs {
    /// Input tree
    pub input_tree: PathBuf,

    /// Output table
    pub output_table: PathBuf,

    /// Increment between evaluated thresholds
    #[arg(long, default_value = "0.01")]
    pub step_size: f64,

    /// Leaf to category file; adds per-category lineage counts
    #[arg(long)]
    pub taxon_category: Option<PathBuf>,
}

/// Execute `bl_dist` subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read or outputs written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_dist(args: BlDistArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    make_sure_path_exists(&args.output_dir)?;

    let tree = load_tree(&args.input_tree)?;
    let taxonomy = load_taxonomy(args.taxonomy_file.as_deref(), &tree, &schema)?;
    let trusted_taxa = load_taxa_list(args.trusted_taxa_file.as_deref())?;

    let distributions = DistributionBuilder::new(&schema)
        .with_config(DistributionConfig {
            min_children: args.min_children,
            min_support: None,
            trusted_taxa,
        })
        .with_taxonomy(&taxonomy)
        .build(&tree, Metric::MeanBranchLength);

    let band = PercentileBand::default();
    let table = args.output_dir.join("bl_dist.tsv");
    write_distribution_table(&table, &distributions, &schema, band)?;

    let taxa_table = args.output_dir.join("bl_taxa.tsv");
    let mut out = create_output(&taxa_table)?;
    writeln!(out, "Taxa\tRank\tMean branch length\tIn baseline")?;
    for o in distributions.observations() {
        writeln!(
            out,
            "{}\t{}\t{:.4}\t{}",
            o.taxon,
            schema.label(o.rank),
            o.value,
            o.in_baseline
        )?;
    }
    out.flush()?;
    info!("Per-taxon branch lengths written to: {}", taxa_table.display());

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = distributions
                .iter()
                .map(|(rank, dist)| {
                    serde_json::json!({
                        "rank": schema.prefix(rank),
                        "taxa": dist.len(),
                        "mean": dist.mean(),
                        "median": dist.median(),
                        "std_dev": dist.std_dev(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            for (rank, dist) in distributions.iter() {
                println!(
                    "{}\t{}\t{}",
                    schema.label(rank),
                    dist.len(),
                    format_optional(dist.median(), 4)
                );
            }
        }
    }
    Ok(())
}

/// Execute `bl_optimal` subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read, the rank is unknown, or the
/// table cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_optimal(args: BlOptimalArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    let rank = parse_rank(&schema, &args.rank)?;
    let tree = load_tree(&args.input_tree)?;
    let taxonomy = load_taxonomy(args.taxonomy_file.as_deref(), &tree, &schema)?;

    let scan = scan_thresholds(&tree, &taxonomy, rank, &schema, Metric::MeanBranchLength);
    if let Some(path) = &args.output_table {
        let mut out = create_output(path)?;
        writeln!(out, "Threshold\tCorrect\tIncorrect\tPrecision")?;
        for a in &scan {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                a.threshold,
                a.correct,
                a.incorrect,
                format_optional(a.precision(), 4)
            )?;
        }
        out.flush()?;
    }

    let best = best_agreement(&scan)
        .ok_or_else(|| anyhow::anyhow!("Tree has no branch lengths to evaluate"))?;

    match format {
        OutputFormat::Text => {
            println!("Optimal branch length is {:.6}.", best.threshold);
            println!(
                "This results in {} correct and {} incorrect taxa (precision = {}).",
                best.correct,
                best.incorrect,
                format_optional(best.precision(), 2)
            );
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "rank": schema.prefix(rank),
                "threshold": best.threshold,
                "correct": best.correct,
                "incorrect": best.incorrect,
                "precision": best.precision(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Tsv => {
            println!("rank\tthreshold\tcorrect\tincorrect\tprecision");
            println!(
                "{}\t{}\t{}\t{}\t{}",
                schema.prefix(rank),
                best.threshold,
                best.correct,
                best.incorrect,
                format_optional(best.precision(), 4)
            );
        }
    }
    Ok(())
}

/// Execute `bl_decorate` subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read, the rank is unknown, or the
/// output cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_decorate(args: BlDecorateArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    anyhow::ensure!(args.threshold >= 0.0, "Threshold must be non-negative");
    let schema = RankSchema::gtdb();
    let rank = parse_rank(&schema, &args.rank)?;
    let mut tree = load_tree(&args.input_tree)?;
    let taxonomy = load_taxonomy(args.taxonomy_file.as_deref(), &tree, &schema)?;

    let config = BranchLengthDecorationConfig {
        threshold: args.threshold,
        rank,
        retain_named_lineages: args.retain_named_lineages,
        keep_labels: args.keep_labels,
        prune: args.prune,
    };
    let decorated = BranchLengthDecorator::new(&schema, &taxonomy, config).decorate(&mut tree);
    write_tree_file(&tree, &args.output_tree)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "decorated": decorated,
                "output_tree": args.output_tree,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            println!("Named {decorated} lineages");
            println!("Decorated tree written to: {}", args.output_tree.display());
        }
    }
    Ok(())
}

/// Execute `bl_table` subcommand
///
/// # Errors
///
/// Returns an error if the step size is not positive, the tree cannot be
/// read, or the table cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_table(args: BlTableArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    anyhow::ensure!(args.step_size > 0.0, "Step size must be positive");
    let tree = load_tree(&args.input_tree)?;

    let values = Metric::MeanBranchLength.node_values(&tree);
    let max = subtree_stats(&tree)[tree.root()].mean_dist;
    anyhow::ensure!(
        max / args.step_size <= 1_000_000.0,
        "Step size {} is too small for a tree of depth {max}",
        args.step_size
    );

    let categories = match &args.taxon_category {
        Some(path) => {
            check_file_exists(path)?;
            let categories = read_category_file(path)?;
            info!("Read categories for {} leaves", categories.len());
            Some(CategoryIndex::new(&tree, &categories))
        }
        None => None,
    };

    let mut rows = Vec::new();
    for step in 0_u32.. {
        let threshold = f64::from(step) * args.step_size;
        if threshold > max {
            break;
        }
        let nodes = crossing_nodes(&tree, &values, Metric::MeanBranchLength, threshold);
        let per_category = categories
            .as_ref()
            .map(|index| index.count(&nodes))
            .unwrap_or_default();
        rows.push((threshold, nodes.len(), per_category));
    }

    let names = categories.as_ref().map(CategoryIndex::names).unwrap_or_default();
    let mut out = create_output(&args.output_table)?;
    write!(out, "Threshold\tLineages")?;
    for name in names {
        write!(out, "\t{name}")?;
    }
    writeln!(out)?;
    for (threshold, lineages, per_category) in &rows {
        write!(out, "{threshold:.4}\t{lineages}")?;
        for count in per_category {
            write!(out, "\t{count}")?;
        }
        writeln!(out)?;
    }
    out.flush()?;

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = rows
                .iter()
                .map(|(t, n, per_category)| {
                    let categories: serde_json::Map<String, serde_json::Value> = names
                        .iter()
                        .cloned()
                        .zip(per_category.iter().map(|&c| c.into()))
                        .collect();
                    serde_json::json!({ "threshold": t, "lineages": n, "categories": categories })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            println!("Evaluated {} thresholds", rows.len());
            println!("Table written to: {}", args.output_table.display());
        }
    }
    Ok(())
}
