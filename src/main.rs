use clap::Parser;
use tracing_subscriber::EnvFilter;

use phylorank::cli::{self, Commands};

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Initialize logging based on verbosity flag
    let filter = if cli.verbose {
        EnvFilter::new("phylorank=debug,info")
    } else {
        EnvFilter::new("phylorank=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let (format, verbose) = (cli.format, cli.verbose);
    match cli.command {
        Commands::Outliers(args) => cli::outliers::run(args, format, verbose)?,
        Commands::Scale(args) => cli::outliers::run_scale(args, format, verbose)?,
        Commands::Decorate(args) => cli::decorate::run(args, format, verbose)?,
        Commands::Pull(args) => cli::taxonomy::run_pull(args, format, verbose)?,
        Commands::Validate(args) => cli::taxonomy::run_validate(args, format, verbose)?,
        Commands::Append(args) => cli::taxonomy::run_append(args, format, verbose)?,
        Commands::TaxonStats(args) => cli::taxonomy::run_taxon_stats(args, format, verbose)?,
        Commands::RankRes(args) => cli::taxonomy::run_rank_res(args, format, verbose)?,
        Commands::RdRanks(args) => cli::rd_ranks::run(args, format, verbose)?,
        Commands::BlDist(args) => cli::branch_length::run_dist(args, format, verbose)?,
        Commands::BlOptimal(args) => cli::branch_length::run_optimal(args, format, verbose)?,
        Commands::BlDecorate(args) => cli::branch_length::run_decorate(args, format, verbose)?,
        Commands::BlTable(args) => cli::branch_length::run_table(args, format, verbose)?,
        Commands::TreeDiff(args) => cli::tree_diff::run(args, format, verbose)?,
    }

    Ok(())
}
