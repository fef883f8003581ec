use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use crate::cli::{
    create_output, load_taxa_list, load_taxonomy, load_tree, write_distribution_table,
    OutputFormat, RootingArgs,
};
use crate::core::types::RankSchema;
use crate::divergence::red::apply_red_branch_lengths;
use crate::divergence::{
    DistributionBuilder, DistributionConfig, Metric, OutlierAssessment, OutlierClass,
    OutlierConfig, OutlierDetector, PercentileBand, RedEngine,
};
use crate::parsing::newick::write_tree_file;
use crate::utils::format_optional;
use crate::utils::validation::make_sure_path_exists;

#[derive(Args)]
pub struct OutliersArgs {
    /// Rooted input tree with labeled internal nodes
    pub input_tree: PathBuf,

    /// Directory for output files
    pub output_dir: PathBuf,

    /// Taxonomy for extant taxa (default: read from tree labels)
    #[arg(long)]
    pub taxonomy_file: Option<PathBuf>,

    /// Restrict rank distributions to lineages made up of these taxa
    #[arg(long)]
    pub trusted_taxa_file: Option<PathBuf>,

    /// Only report these taxa
    #[arg(long)]
    pub plot_taxa_file: Option<PathBuf>,

    /// Only report taxa within this domain (e.g. d__Bacteria)
    #[arg(long)]
    pub domain: Option<String>,

    /// Minimum named child taxa for a taxon to enter the distributions
    #[arg(long, default_value = "2")]
    pub min_children: usize,

    /// Minimum support for a taxon to enter the distributions
    #[arg(long, default_value = "0")]
    pub min_support: f64,

    /// Lower percentile of the expected band
    #[arg(long, default_value = "5")]
    pub lower_percentile: f64,

    /// Upper percentile of the expected band
    #[arg(long, default_value = "95")]
    pub upper_percentile: f64,

    /// Prefix for output files (default: input tree file stem)
    #[arg(long)]
    pub prefix: Option<String>,

    #[command(flatten)]
    pub rooting: RootingArgs,
}

#[derive(Args)]
pub struct ScaleArgs {
    /// Rooted input tree
    pub input_tree: PathBuf,

    /// Output tree with RED-scaled branch lengths
    pub output_tree: PathBuf,

    #[command(flatten)]
    pub rooting: RootingArgs,
}

/// Execute outliers subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read, the tree violates the root
/// policy, or output files cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run(args: OutliersArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.lower_percentile <= args.upper_percentile,
        "Lower percentile must not exceed upper percentile"
    );
    let schema = RankSchema::gtdb();
    make_sure_path_exists(&args.output_dir)?;

    let mut tree = load_tree(&args.input_tree)?;
    let taxonomy = load_taxonomy(args.taxonomy_file.as_deref(), &tree, &schema)?;
    let trusted_taxa = load_taxa_list(args.trusted_taxa_file.as_deref())?;
    let allow_list = load_taxa_list(args.plot_taxa_file.as_deref())?;

    let red = RedEngine::with_policy(args.rooting.policy()).compute(&mut tree)?;

    let config = DistributionConfig {
        min_children: args.min_children,
        min_support: Some(args.min_support),
        trusted_taxa,
    };
    let distributions = DistributionBuilder::new(&schema)
        .with_config(config)
        .with_taxonomy(&taxonomy)
        .build(&tree, Metric::Red);

    let band = PercentileBand {
        lower: args.lower_percentile,
        upper: args.upper_percentile,
    };
    let detector = OutlierDetector::with_config(
        &distributions,
        OutlierConfig {
            band,
            domain: args.domain.clone(),
            allow_list,
        },
    );
    let assessments = detector.assess();

    let prefix = args.prefix.clone().unwrap_or_else(|| file_stem(&args.input_tree));
    let dist_table = args.output_dir.join(format!("{prefix}.rank_distribution.tsv"));
    write_distribution_table(&dist_table, &distributions, &schema, band)?;
    let node_table = args.output_dir.join(format!("{prefix}.node_rd.tsv"));
    write_node_table(&node_table, &assessments, &schema)?;

    let mut scaled = tree.clone();
    apply_red_branch_lengths(&mut scaled, &red);
    let scaled_tree = args.output_dir.join(format!("{prefix}.scaled.tree"));
    write_tree_file(&scaled, &scaled_tree)?;

    let below = count_class(&assessments, OutlierClass::Below);
    let above = count_class(&assessments, OutlierClass::Above);
    info!(
        "Assessed {} taxa: {below} below and {above} above the expected band",
        assessments.len()
    );

    match format {
        OutputFormat::Text => {
            println!("Taxa assessed:  {}", assessments.len());
            println!("Below band:     {below}");
            println!("Above band:     {above}");
            println!("Distributions:  {}", dist_table.display());
            println!("Node table:     {}", node_table.display());
            println!("Scaled tree:    {}", scaled_tree.display());
            if verbose {
                for a in assessments.iter().filter(|a| a.classification.class.is_outlier()) {
                    println!(
                        "  {}\t{:.3}\t{}\t{:.3}",
                        a.taxon, a.value, a.classification.class, a.classification.deviation
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "assessed": assessments.len(),
                "below": below,
                "above": above,
                "outliers": assessments
                    .iter()
                    .filter(|a| a.classification.class.is_outlier())
                    .collect::<Vec<_>>(),
                "files": {
                    "rank_distribution": dist_table,
                    "node_rd": node_table,
                    "scaled_tree": scaled_tree,
                },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Tsv => {
            println!("taxon\tred\tclass\tdeviation");
            for a in assessments.iter().filter(|a| a.classification.class.is_outlier()) {
                println!(
                    "{}\t{:.4}\t{}\t{:.4}",
                    a.taxon, a.value, a.classification.class, a.classification.deviation
                );
            }
        }
    }

    Ok(())
}

/// Execute scale subcommand
///
/// # Errors
///
/// Returns an error if the tree cannot be read, violates the root policy,
/// or the output cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_scale(args: ScaleArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(&args.input_tree)?;
    let red = RedEngine::with_policy(args.rooting.policy()).compute(&mut tree)?;
    apply_red_branch_lengths(&mut tree, &red);
    write_tree_file(&tree, &args.output_tree)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({ "output_tree": args.output_tree, "nodes": red.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            println!("Scaled tree written to: {}", args.output_tree.display());
        }
    }
    Ok(())
}

fn count_class(assessments: &[OutlierAssessment], class: OutlierClass) -> usize {
    assessments
        .iter()
        .filter(|a| a.classification.class == class)
        .count()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map_or_else(|| "phylorank".to_string(), str::to_string)
}

fn write_node_table(
    path: &Path,
    assessments: &[OutlierAssessment],
    schema: &RankSchema,
) -> anyhow::Result<()> {
    let mut out = create_output(path)?;
    writeln!(
        out,
        "Taxa\tRank\tRED\tMedian RED\tPercentile\tLower bound\tUpper bound\tClass\tDeviation\tIn baseline"
    )?;
    for a in assessments {
        let rank = schema
            .lowest_rank(&a.taxon)
            .map_or("NA", |r| schema.label(r));
        writeln!(
            out,
            "{}\t{rank}\t{:.4}\t{}\t{}\t{:.4}\t{:.4}\t{}\t{:.4}\t{}",
            a.taxon,
            a.value,
            format_optional(a.median, 4),
            format_optional(a.percentile, 1),
            a.classification.bounds.lower,
            a.classification.bounds.upper,
            a.classification.class,
            a.classification.deviation,
            a.in_baseline,
        )?;
    }
    out.flush()?;
    Ok(())
}
