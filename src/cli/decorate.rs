use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::cli::{load_tree, OutputFormat, RootingArgs};
use crate::core::types::RankSchema;
use crate::divergence::{
    DecorationConfig, Decorator, DistributionBuilder, DistributionConfig, Metric, RankThresholds,
    RedEngine,
};
use crate::parsing::lists::parse_threshold_spec;
use crate::parsing::newick::write_tree_file;

#[derive(Args)]
pub struct DecorateArgs {
    /// Rooted input tree
    pub input_tree: PathBuf,

    /// Decorated output tree
    pub output_tree: PathBuf,

    /// RED thresholds as a JSON file, inline JSON, or 'p__=0.35,c__=0.5,...'
    /// (default: derived from the rank distributions of the tree)
    #[arg(long)]
    pub thresholds: Option<String>,

    /// Only decorate nodes with at least this support
    #[arg(long, default_value = "0")]
    pub min_support: f64,

    /// Only decorate nodes already carrying a taxon
    #[arg(long)]
    pub only_named_clades: bool,

    /// Only decorate nodes with a branch at least this long
    #[arg(long, default_value = "0")]
    pub min_length: f64,

    /// Remove existing taxa from decorated labels
    #[arg(long)]
    pub strip_taxa: bool,

    /// Do not write the percentile of the node's rank distribution
    #[arg(long)]
    pub no_percentile: bool,

    /// Do not write the RED value
    #[arg(long)]
    pub no_relative_divergence: bool,

    /// Do not write the predicted rank
    #[arg(long)]
    pub no_prediction: bool,

    /// Collapse each outermost decorated clade into a single leaf
    #[arg(long)]
    pub prune: bool,

    #[command(flatten)]
    pub rooting: RootingArgs,
}

/// Execute decorate subcommand
///
/// # Errors
///
/// Returns an error if the tree or thresholds cannot be read, the tree
/// violates the root policy, or the output cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run(args: DecorateArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    let mut tree = load_tree(&args.input_tree)?;
    let red = RedEngine::with_policy(args.rooting.policy()).compute(&mut tree)?;

    let distributions = DistributionBuilder::new(&schema)
        .with_config(DistributionConfig {
            min_support: Some(args.min_support),
            ..DistributionConfig::default()
        })
        .build(&tree, Metric::Red);

    let thresholds = match &args.thresholds {
        Some(spec) => RankThresholds::from_prefix_map(&parse_threshold_spec(spec)?, &schema)?,
        None => {
            info!("No thresholds given; deriving cut values from rank medians");
            RankThresholds::from_distributions(&distributions)
        }
    };
    if verbose {
        for (rank, cut) in thresholds.iter() {
            eprintln!("  {}\t{cut:.3}", schema.prefix(rank));
        }
    }

    let config = DecorationConfig {
        min_support: Some(args.min_support),
        min_length: args.min_length,
        only_named_clades: args.only_named_clades,
        retain_taxa: !args.strip_taxa,
        percentile: !args.no_percentile,
        red: !args.no_relative_divergence,
        prediction: !args.no_prediction,
        prune: args.prune,
    };
    let decorated = Decorator::with_config(&schema, &distributions, &thresholds, config)
        .decorate(&mut tree, &red);
    write_tree_file(&tree, &args.output_tree)?;

    match format {
        OutputFormat::Text => {
            println!("Decorated {decorated} nodes");
            println!("Decorated tree written to: {}", args.output_tree.display());
        }
        OutputFormat::Json => {
            let cuts: serde_json::Map<String, serde_json::Value> = thresholds
                .iter()
                .map(|(rank, cut)| (schema.prefix(rank).to_string(), cut.into()))
                .collect();
            let output = serde_json::json!({
                "decorated": decorated,
                "thresholds": cuts,
                "output_tree": args.output_tree,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Tsv => {
            println!("rank\tthreshold");
            for (rank, cut) in thresholds.iter() {
                println!("{}\t{cut:.4}", schema.prefix(rank));
            }
        }
    }
    Ok(())
}
