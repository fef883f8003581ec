use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::cli::{create_output, load_tree, OutputFormat, RootingArgs};
use crate::core::types::RankSchema;
use crate::divergence::{RankThresholds, RedEngine};
use crate::parsing::lists::parse_threshold_spec;
use crate::utils::validation::make_sure_path_exists;

#[derive(Args)]
pub struct RdRanksArgs {
    /// Rooted input tree
    pub input_tree: PathBuf,

    /// Directory for output files
    pub output_dir: PathBuf,

    /// RED thresholds as a JSON file, inline JSON, or 'p__=0.35,c__=0.5,...'
    #[arg(long)]
    pub thresholds: String,

    #[command(flatten)]
    pub rooting: RootingArgs,
}

/// Execute `rd_ranks` subcommand
///
/// # Errors
///
/// Returns an error if the tree or thresholds cannot be read, the tree
/// violates the root policy, or outputs cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run(args: RdRanksArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    make_sure_path_exists(&args.output_dir)?;

    let thresholds = RankThresholds::from_prefix_map(&parse_threshold_spec(&args.thresholds)?, &schema)?;
    let mut tree = load_tree(&args.input_tree)?;
    RedEngine::with_policy(args.rooting.policy()).compute(&mut tree)?;

    let crossings = thresholds.crossing_lineages(&tree);

    let table = args.output_dir.join("rd_ranks.tsv");
    let mut out = create_output(&table)?;
    writeln!(out, "Rank\tRED threshold\tLineages")?;
    for (rank, cut, nodes) in &crossings {
        writeln!(out, "{}\t{cut}\t{}", schema.label(*rank), nodes.len())?;
    }
    out.flush()?;

    let lineages = args.output_dir.join("rd_lineages.tsv");
    let mut out = create_output(&lineages)?;
    writeln!(out, "Rank\tRED\tExtant taxa\tLabel")?;
    for (rank, _, nodes) in &crossings {
        for &node in nodes {
            writeln!(
                out,
                "{}\t{:.4}\t{}\t{}",
                schema.prefix(*rank),
                tree[node].red.unwrap_or_default(),
                tree.leaves_under(node).len(),
                tree[node].label().unwrap_or_default(),
            )?;
        }
    }
    out.flush()?;
    info!("Lineage table written to: {}", lineages.display());

    match format {
        OutputFormat::Text => {
            for (rank, cut, nodes) in &crossings {
                println!("{:<8} RED >= {cut:<6} {} lineages", schema.label(*rank), nodes.len());
            }
        }
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = crossings
                .iter()
                .map(|(rank, cut, nodes)| {
                    serde_json::json!({
                        "rank": schema.prefix(*rank),
                        "threshold": cut,
                        "lineages": nodes.len(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Tsv => {
            println!("rank\tthreshold\tlineages");
            for (rank, cut, nodes) in &crossings {
                println!("{}\t{cut}\t{}", schema.prefix(*rank), nodes.len());
            }
        }
    }
    Ok(())
}
