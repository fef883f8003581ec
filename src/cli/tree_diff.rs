use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use crate::cli::{create_output, load_tree, OutputFormat};
use crate::core::diff::{tree_diff, CladeStatus, DiffOptions, TreeDiff};
use crate::utils::format_optional;

#[derive(Args)]
pub struct TreeDiffArgs {
    /// First input tree
    pub input_tree1: PathBuf,

    /// Second input tree
    pub input_tree2: PathBuf,

    /// Output table of compared clades
    pub output_file: PathBuf,

    /// Ignore clades with support below this value
    #[arg(long, default_value = "0")]
    pub min_support: f64,

    /// Ignore clades with fewer shared taxa than this
    #[arg(long, default_value = "1")]
    pub min_taxa: usize,

    /// Only compare clades carrying a taxon name
    #[arg(long)]
    pub named_only: bool,
}

const STATUSES: [CladeStatus; 4] = [
    CladeStatus::Shared,
    CladeStatus::MembersDiffer,
    CladeStatus::OnlyFirst,
    CladeStatus::OnlySecond,
];

/// Execute `tree_diff` subcommand
///
/// # Errors
///
/// Returns an error if either tree cannot be read or the table cannot be
/// written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run(args: TreeDiffArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let first = load_tree(&args.input_tree1)?;
    let second = load_tree(&args.input_tree2)?;
    let options = DiffOptions {
        min_support: args.min_support,
        min_taxa: args.min_taxa,
        named_only: args.named_only,
    };

    let diff = tree_diff(&first, &second, &options);
    write_diff_table(&args.output_file, &diff)?;
    info!("Clade comparison written to: {}", args.output_file.display());

    match format {
        OutputFormat::Text => print_text_summary(&args, &diff, verbose),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "input_tree1": args.input_tree1.display().to_string(),
                "input_tree2": args.input_tree2.display().to_string(),
                "leaves_only_first": diff.leaves_only_first,
                "leaves_only_second": diff.leaves_only_second,
                "counts": STATUSES
                    .iter()
                    .map(|s| (s.as_str(), diff.count(*s)))
                    .collect::<BTreeMap<_, _>>(),
                "clades": diff.clades,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Tsv => {
            println!("status\tclades");
            for status in STATUSES {
                println!("{}\t{}", status.as_str(), diff.count(status));
            }
        }
    }
    Ok(())
}

fn write_diff_table(path: &Path, diff: &TreeDiff) -> anyhow::Result<()> {
    let mut out = create_output(path)?;
    writeln!(
        out,
        "Clade\tStatus\tTaxa in tree 1\tTaxa in tree 2\tSupport in tree 1\tSupport in tree 2\tOnly in tree 1\tOnly in tree 2"
    )?;
    for c in &diff.clades {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            c.clade,
            c.status.as_str(),
            c.taxa_first,
            c.taxa_second,
            format_optional(c.support_first, 1),
            format_optional(c.support_second, 1),
            c.only_first.join(","),
            c.only_second.join(","),
        )?;
    }
    out.flush()?;
    Ok(())
}

fn print_text_summary(args: &TreeDiffArgs, diff: &TreeDiff, verbose: bool) {
    println!("Tree comparison");
    println!("{}", "=".repeat(60));
    println!("\nTree 1: {}", args.input_tree1.display());
    println!("Tree 2: {}", args.input_tree2.display());
    println!(
        "Leaves only in tree 1: {}; only in tree 2: {}",
        diff.leaves_only_first.len(),
        diff.leaves_only_second.len()
    );

    println!("\nClades:");
    println!("  Shared: {}", diff.count(CladeStatus::Shared));
    println!("  Different members: {}", diff.count(CladeStatus::MembersDiffer));
    println!("  Only in tree 1: {}", diff.count(CladeStatus::OnlyFirst));
    println!("  Only in tree 2: {}", diff.count(CladeStatus::OnlySecond));

    if verbose {
        for c in diff.clades.iter().filter(|c| c.status == CladeStatus::MembersDiffer) {
            println!(
                "  {}: -{} +{}",
                c.clade,
                c.only_first.join(","),
                c.only_second.join(",")
            );
        }
    }
}
