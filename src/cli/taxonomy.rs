//! Commands that read, check and summarise taxonomy strings.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use tracing::{error, info};

use crate::cli::{create_output, load_tree, report_leaf_coverage, OutputFormat};
use crate::core::taxonomy::{Taxonomy, TaxonomyError, ValidationOptions};
use crate::core::tree::Tree;
use crate::core::types::{split_taxa, RankSchema};
use crate::parsing::newick::write_tree_file;
use crate::parsing::taxonomy::{read_taxonomy_file, write_taxonomy_file};
use crate::utils::validation::check_file_exists;

#[derive(Args)]
pub struct PullArgs {
    /// Decorated input tree
    pub input_tree: PathBuf,

    /// Output taxonomy file
    pub output_file: PathBuf,

    /// Do not pad taxonomy strings with empty ranks
    #[arg(long)]
    pub no_rank_fill: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Taxonomy file to validate
    pub taxonomy_file: PathBuf,

    /// Do not check rank prefixes
    #[arg(long)]
    pub no_prefix: bool,

    /// Do not check that every rank is present
    #[arg(long)]
    pub no_all_ranks: bool,

    /// Do not check for taxa with multiple parents
    #[arg(long)]
    pub no_hierarchy: bool,

    /// Do not check species names against their genus
    #[arg(long)]
    pub no_species: bool,
}

#[derive(Args)]
pub struct AppendArgs {
    /// Input tree
    pub input_tree: PathBuf,

    /// Taxonomy file with an entry for every leaf
    pub taxonomy_file: PathBuf,

    /// Output tree
    pub output_tree: PathBuf,
}

#[derive(Args)]
pub struct TaxonStatsArgs {
    /// Taxonomy file
    pub taxonomy_file: PathBuf,

    /// Output table
    pub output_file: PathBuf,
}

#[derive(Args)]
pub struct RankResArgs {
    /// Decorated input tree
    pub input_tree: PathBuf,

    /// Taxonomy file for extant taxa
    pub taxonomy_file: PathBuf,

    /// Output table
    pub output_file: PathBuf,

    /// Also write the taxa behind each count to this file
    #[arg(long)]
    pub taxa_file: Option<PathBuf>,
}

/// Execute pull subcommand
///
/// # Errors
///
/// Returns an error if the tree cannot be read or the output written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_pull(args: PullArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    let tree = load_tree(&args.input_tree)?;
    let taxonomy = Taxonomy::from_tree(&tree, &schema, !args.no_rank_fill);
    write_taxonomy_file(&taxonomy, &args.output_file)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "taxa": taxonomy.len(),
                "output_file": args.output_file,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            println!("Taxonomy strings written to: {}", args.output_file.display());
        }
    }
    Ok(())
}

/// Execute validate subcommand
///
/// Every problem is reported; validation errors do not fail the command.
///
/// # Errors
///
/// Returns an error if the taxonomy file cannot be read.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_validate(args: ValidateArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    check_file_exists(&args.taxonomy_file)?;
    let taxonomy = read_taxonomy_file(&args.taxonomy_file)?;

    let options = ValidationOptions {
        check_prefixes: !args.no_prefix,
        check_all_ranks: !args.no_all_ranks,
        check_hierarchy: !args.no_hierarchy,
        check_species: !args.no_species,
    };
    let report = taxonomy.validate(&schema, &options);

    if report.is_empty() {
        info!("No errors identified in taxonomy file.");
    } else {
        info!("Identified {} incomplete taxonomy strings.", report.incomplete_taxonomies.len());
        info!("Identified {} rank prefix errors.", report.invalid_prefixes.len());
        info!("Identified {} invalid species names.", report.invalid_species_names.len());
        info!("Identified {} taxa with multiple parents.", report.multiple_parents.len());
    }

    match format {
        OutputFormat::Text => {
            println!("Incomplete taxonomy strings: {}", report.incomplete_taxonomies.len());
            println!("Rank prefix errors:          {}", report.invalid_prefixes.len());
            println!("Invalid species names:       {}", report.invalid_species_names.len());
            println!("Taxa with multiple parents:  {}", report.multiple_parents.len());
            if verbose {
                for (id, lineage) in &report.incomplete_taxonomies {
                    println!("  incomplete\t{id}\t{lineage}");
                }
                for (id, taxon) in &report.invalid_prefixes {
                    println!("  prefix\t{id}\t{taxon}");
                }
                for (id, species) in &report.invalid_species_names {
                    println!("  species\t{id}\t{species}");
                }
                for (taxon, parents) in &report.multiple_parents {
                    let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
                    println!("  hierarchy\t{taxon}\t{}", parents.join(", "));
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Tsv => {
            println!("error\tentry\tvalue");
            for (id, lineage) in &report.incomplete_taxonomies {
                println!("incomplete_taxonomy\t{id}\t{lineage}");
            }
            for (id, taxon) in &report.invalid_prefixes {
                println!("invalid_prefix\t{id}\t{taxon}");
            }
            for (id, species) in &report.invalid_species_names {
                println!("invalid_species_name\t{id}\t{species}");
            }
            for (taxon, parents) in &report.multiple_parents {
                let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
                println!("multiple_parents\t{taxon}\t{}", parents.join(","));
            }
        }
    }
    Ok(())
}

/// Execute append subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read, any leaf is missing from the
/// taxonomy, or the output cannot be written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_append(args: AppendArgs, format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let mut tree = load_tree(&args.input_tree)?;
    check_file_exists(&args.taxonomy_file)?;
    let taxonomy = read_taxonomy_file(&args.taxonomy_file)?;

    let leaves = tree.leaves();
    for &leaf in &leaves {
        let id = tree[leaf].label().unwrap_or_default().to_string();
        let Some(lineage) = taxonomy.get(&id) else {
            error!("Taxonomy file does not contain an entry for {id}.");
            return Err(TaxonomyError::MissingEntry(id).into());
        };
        tree[leaf].label = Some(format!("{id}|{}", lineage.join(";")));
    }
    write_tree_file(&tree, &args.output_tree)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "leaves": leaves.len(),
                "output_tree": args.output_tree,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text | OutputFormat::Tsv => {
            println!("Decorated tree written to: {}", args.output_tree.display());
        }
    }
    Ok(())
}

/// Execute `taxon_stats` subcommand
///
/// # Errors
///
/// Returns an error if the taxonomy cannot be read or the table written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_taxon_stats(args: TaxonStatsArgs, _format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    check_file_exists(&args.taxonomy_file)?;
    let taxonomy = read_taxonomy_file(&args.taxonomy_file)?;
    let mut out = create_output(&args.output_file)?;
    write_taxon_stats(&taxonomy, &schema, &mut out)?;
    out.flush()?;

    println!("Summary statistics written to: {}", args.output_file.display());
    Ok(())
}

/// For each taxon, the number of named descendants at every lower rank and
/// the number of extant taxa below it.
fn write_taxon_stats<W: Write>(
    taxonomy: &Taxonomy,
    schema: &RankSchema,
    out: &mut W,
) -> std::io::Result<()> {
    let children = taxonomy.taxon_children(schema);
    let species = schema.species().index();

    write!(out, "Taxa")?;
    for rank in schema.ranks().skip(1) {
        write!(out, "\t# named {}", schema.label(rank))?;
    }
    writeln!(out, "\t# extant taxon with complete taxonomy")?;

    for rank in schema.ranks() {
        // BTreeMap keys are already sorted
        for taxon in children
            .keys()
            .filter(|t| schema.rank_of_taxon(t) == Some(rank))
        {
            write!(out, "{taxon}{}", "\t-".repeat(rank.index()))?;

            let mut next: BTreeSet<&str> = BTreeSet::from([taxon.as_str()]);
            for _ in rank.index()..=species {
                let below: BTreeSet<&str> = next
                    .iter()
                    .filter_map(|t| children.get(*t))
                    .flatten()
                    .map(String::as_str)
                    .collect();
                write!(out, "\t{}", below.len())?;
                next = below;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Execute `rank_res` subcommand
///
/// # Errors
///
/// Returns an error if inputs cannot be read or outputs written.
#[allow(clippy::needless_pass_by_value)] // CLI entry point, values from clap
pub fn run_rank_res(args: RankResArgs, _format: OutputFormat, _verbose: bool) -> anyhow::Result<()> {
    let schema = RankSchema::gtdb();
    let tree = load_tree(&args.input_tree)?;
    check_file_exists(&args.taxonomy_file)?;
    let taxonomy = read_taxonomy_file(&args.taxonomy_file)?;
    report_leaf_coverage(&taxonomy, &tree);

    let resolution = RankResolution::compute(&tree, &taxonomy, &schema);

    if let Some(path) = &args.taxa_file {
        let mut out = create_output(path)?;
        for (rank_prefix, lowest, taxon) in &resolution.taxa {
            writeln!(out, "{rank_prefix}\t{lowest}\t{taxon}")?;
        }
        out.flush()?;
    }

    let mut out = create_output(&args.output_file)?;
    resolution.write_table(&schema, &mut out)?;
    out.flush()?;

    println!("Resolution table written to: {}", args.output_file.display());
    Ok(())
}

/// Counts of named groups by the rank they are named at and the lowest
/// rank their label resolves to.
struct RankResolution {
    /// rank prefix -> lowest resolved prefix -> count
    counts: BTreeMap<String, BTreeMap<String, usize>>,
    /// (rank prefix, lowest resolved prefix, taxon string)
    taxa: Vec<(String, String, String)>,
}

impl RankResolution {
    fn compute(tree: &Tree, taxonomy: &Taxonomy, schema: &RankSchema) -> Self {
        let mut resolution = Self {
            counts: BTreeMap::new(),
            taxa: Vec::new(),
        };

        for id in tree.internal_nodes() {
            if tree.is_root(id) {
                continue;
            }
            let decoded = tree[id].decoded_label();
            let Some(taxon) = decoded.taxon() else {
                continue;
            };
            let Some(lowest) = split_taxa(taxon).last() else {
                continue;
            };
            let lowest: String = lowest.chars().take(3).collect();
            for rank in schema.ranks() {
                let prefix = schema.prefix(rank);
                if taxon.contains(prefix) {
                    resolution.add(prefix, &lowest, taxon);
                }
            }
        }

        // A bare prefix marks the sole representative of an unnamed taxon,
        // which is resolved all the way to species
        let species_prefix = schema.prefix(schema.species());
        for (_, lineage) in taxonomy.iter() {
            for rank in schema.ranks() {
                let prefix = schema.prefix(rank);
                if lineage.get(rank.index()).is_some_and(|t| t == prefix) {
                    resolution.add(prefix, species_prefix, prefix);
                }
            }
        }

        resolution
    }

    fn add(&mut self, rank_prefix: &str, lowest: &str, taxon: &str) {
        *self
            .counts
            .entry(rank_prefix.to_string())
            .or_default()
            .entry(lowest.to_string())
            .or_insert(0) += 1;
        self.taxa
            .push((rank_prefix.to_string(), lowest.to_string(), taxon.to_string()));
    }

    fn write_table<W: Write>(&self, schema: &RankSchema, out: &mut W) -> std::io::Result<()> {
        write!(out, "Category")?;
        for rank in schema.ranks().skip(1) {
            write!(out, "\t{}", schema.label(rank))?;
        }
        writeln!(out)?;

        for (i, row) in schema.ranks().skip(1).enumerate() {
            write!(out, "{}", schema.label(row))?;
            for (j, column) in schema.ranks().skip(1).enumerate() {
                if i >= j {
                    let count = self
                        .counts
                        .get(schema.prefix(column))
                        .and_then(|c| c.get(schema.prefix(row)))
                        .copied()
                        .unwrap_or(0);
                    write!(out, "\t{count}")?;
                } else {
                    write!(out, "\t-")?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::newick::parse_newick_str;
    use crate::parsing::taxonomy::parse_taxonomy_text;

    fn taxonomy() -> Taxonomy {
        parse_taxonomy_text(
            "G1\td__B;p__P;c__C;o__O;f__F;g__Ga;s__Ga alpha\n\
             G2\td__B;p__P;c__C;o__O;f__F;g__Ga;s__Ga beta\n\
             G3\td__B;p__P;c__C;o__O;f__F;g__Gb;s__Gb gamma\n",
        )
        .unwrap()
    }

    #[test]
    fn test_taxon_stats_table() {
        let mut out = Vec::new();
        write_taxon_stats(&taxonomy(), &RankSchema::gtdb(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Taxa\t# named phylum\t# named class\t# named order\t# named family\t# named genus\t# named species\t# extant taxon with complete taxonomy"
        );
        assert_eq!(lines[1], "d__B\t1\t1\t1\t1\t2\t3\t3");
        assert!(lines.contains(&"g__Ga\t-\t-\t-\t-\t-\t2\t2"));
        assert!(lines.contains(&"s__Gb gamma\t-\t-\t-\t-\t-\t-\t1"));
        for line in &lines {
            assert_eq!(line.split('\t').count(), 8);
        }
    }

    #[test]
    fn test_rank_resolution() {
        let schema = RankSchema::gtdb();
        let tree =
            parse_newick_str("(((G1:1,G2:1)'f__F; g__Ga':1,G3:1)'p__P; c__C':1,G4:1);").unwrap();
        let mut taxonomy = taxonomy();
        taxonomy.insert(
            "G4",
            ["d__B", "p__", "c__", "o__", "f__", "g__", "s__"].map(String::from).to_vec(),
        );
        let resolution = RankResolution::compute(&tree, &taxonomy, &schema);

        assert_eq!(resolution.counts["f__"]["g__"], 1);
        assert_eq!(resolution.counts["g__"]["g__"], 1);
        assert_eq!(resolution.counts["p__"]["c__"], 1);
        // G4 is the sole representative of its phylum
        assert_eq!(resolution.counts["p__"]["s__"], 1);

        let mut out = Vec::new();
        resolution.write_table(&schema, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Category\tphylum\tclass\torder\tfamily\tgenus\tspecies");
        assert_eq!(lines[1], "phylum\t0\t-\t-\t-\t-\t-");
        assert_eq!(lines[2], "class\t1\t1\t-\t-\t-\t-");
        assert_eq!(lines[6], "species\t1\t1\t1\t1\t1\t1");
    }
}
