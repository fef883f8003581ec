//! End-to-end tests driving the phylorank binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use phylorank::parsing::newick::read_tree_file;

const TREE: &str = "((((G1:0.1,G2:0.1)'95:g__Ga':0.3,(G3:0.2,G4:0.2)g__Gb:0.5)f__F1:0.4,\
((G5:0.2,G6:0.3)g__Gc:0.2,G7:0.6)f__F2:0.3)o__O1:0.2,(G8:0.5,G9:0.4)o__O2:0.9);";

const TAXONOMY: &str = "\
G1\td__B;p__P;c__C;o__O1;f__F1;g__Ga;s__Ga a
G2\td__B;p__P;c__C;o__O1;f__F1;g__Ga;s__Ga b
G3\td__B;p__P;c__C;o__O1;f__F1;g__Gb;s__Gb a
G4\td__B;p__P;c__C;o__O1;f__F1;g__Gb;s__Gb b
G5\td__B;p__P;c__C;o__O1;f__F2;g__Gc;s__Gc a
G6\td__B;p__P;c__C;o__O1;f__F2;g__Gc;s__Gc b
G7\td__B;p__P;c__C;o__O1;f__F2;g__Gd;s__Gd a
G8\td__B;p__P;c__C;o__O2;f__F3;g__Ge;s__Ge a
G9\td__B;p__P;c__C;o__O2;f__F3;g__Ge;s__Ge b
";

fn phylorank() -> Command {
    Command::cargo_bin("phylorank").unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_append_two_leaf_tree() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", "(G1_x:0.1,G2:0.2);");
    let taxonomy = write(
        dir.path(),
        "taxonomy.tsv",
        "G1_x\td__B;p__P;c__C;o__O;f__F;g__G;s__G alpha\nG2\td__B;p__P;c__C;o__O;f__F;g__G;s__G beta\n",
    );
    let output = dir.path().join("out.tree");

    phylorank()
        .args(["append", &tree, &taxonomy])
        .arg(&output)
        .assert()
        .success();

    let result = read_tree_file(&output).unwrap();
    let labels: Vec<&str> = result
        .leaves()
        .into_iter()
        .filter_map(|l| result[l].label())
        .collect();
    assert_eq!(
        labels,
        vec![
            "G1_x|d__B;p__P;c__C;o__O;f__F;g__G;s__G alpha",
            "G2|d__B;p__P;c__C;o__O;f__F;g__G;s__G beta",
        ]
    );
    // The appended lineage forces quoting; underscores stay literal inside it
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("'G1_x|d__B;"));
    assert!(!written.contains("G1 x"));
}

#[test]
fn test_append_missing_entry_fails() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", "(G1:0.1,G2:0.2);");
    let taxonomy = write(dir.path(), "taxonomy.tsv", "G1\td__B;p__P;c__;o__;f__;g__;s__\n");
    let output = dir.path().join("out.tree");

    phylorank()
        .args(["append", &tree, &taxonomy])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not contain an entry for G2"));
}

#[test]
fn test_validate_reports_incomplete_entry() {
    let dir = TempDir::new().unwrap();
    let content = format!("{TAXONOMY}G10\td__B;p__P;c__C;o__O1\n");
    let taxonomy = write(dir.path(), "taxonomy.tsv", &content);

    let output = phylorank()
        .args(["validate", &taxonomy, "--format", "json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Identified 1 incomplete taxonomy strings."))
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["incomplete_taxonomies"].as_array().unwrap().len(), 1);
    assert_eq!(report["invalid_prefixes"].as_array().unwrap().len(), 0);
}

#[test]
fn test_validate_clean_taxonomy() {
    let dir = TempDir::new().unwrap();
    let taxonomy = write(dir.path(), "taxonomy.tsv", TAXONOMY);
    phylorank()
        .args(["validate", &taxonomy])
        .assert()
        .success()
        .stderr(predicate::str::contains("No errors identified"));
}

#[test]
fn test_decorate_writes_annotations() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let output = dir.path().join("decorated.tree");

    phylorank()
        .args(["decorate", &tree])
        .arg(&output)
        .args(["--thresholds", "o__=0.1,f__=0.3,g__=0.6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Decorated 7 nodes"));

    let decorated = read_tree_file(&output).unwrap();
    let ga = decorated.find_by_taxon("g__Ga").unwrap();
    let label = decorated[ga].decoded_label();
    assert_eq!(label.support_value(), Some(95.0));
    let aux = label.auxiliary().unwrap();
    assert!(aux.starts_with("perc="));
    assert!(aux.contains("|RED="));
    assert!(aux.ends_with("|pred=g__"));
}

#[test]
fn test_decorate_rejects_unknown_rank() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let output = dir.path().join("decorated.tree");
    phylorank()
        .args(["decorate", &tree])
        .arg(&output)
        .args(["--thresholds", "x__=0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown rank prefix"));
}

#[test]
fn test_outliers_writes_tables() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "gtdb.tree", TREE);
    let taxonomy = write(dir.path(), "taxonomy.tsv", TAXONOMY);
    let out_dir = dir.path().join("out");

    phylorank()
        .args(["outliers", &tree])
        .arg(&out_dir)
        .args(["--taxonomy-file", &taxonomy, "--min-children", "0", "--fixed-root"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Taxa assessed:"));

    let dist = fs::read_to_string(out_dir.join("gtdb.rank_distribution.tsv")).unwrap();
    assert!(dist.starts_with("Rank\tTaxa\tMean"));
    assert!(dist.lines().any(|l| l.starts_with("genus\t3\t")));

    let nodes = fs::read_to_string(out_dir.join("gtdb.node_rd.tsv")).unwrap();
    assert_eq!(nodes.lines().count(), 1 + 7);
    assert!(nodes.lines().skip(1).all(|l| l.ends_with("\ttrue")));

    let scaled = read_tree_file(&out_dir.join("gtdb.scaled.tree")).unwrap();
    assert_eq!(scaled.num_leaves(), 9);
}

#[test]
fn test_fixed_root_rejects_unrooted_tree() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", "((A:1,B:1)g__X:1,C:1,D:1);");
    let output = dir.path().join("scaled.tree");
    phylorank()
        .args(["scale", &tree])
        .arg(&output)
        .arg("--fixed-root")
        .assert()
        .failure()
        .stderr(predicate::str::contains("fixed root"));
}

#[test]
fn test_bl_optimal() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let taxonomy = write(dir.path(), "taxonomy.tsv", TAXONOMY);
    let table = dir.path().join("scan.tsv");

    phylorank()
        .args(["bl_optimal", &tree, "--rank", "genus", "--taxonomy-file", &taxonomy])
        .arg("--output-table")
        .arg(&table)
        .assert()
        .success()
        .stdout(predicate::str::contains("Optimal branch length is"))
        .stdout(predicate::str::contains("correct and"));

    let scan = fs::read_to_string(&table).unwrap();
    assert!(scan.starts_with("Threshold\tCorrect\tIncorrect\tPrecision"));
}

#[test]
fn test_taxonomy_mismatches_are_reported() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let partial: String = TAXONOMY
        .lines()
        .filter(|l| !l.starts_with("G9\t"))
        .map(|l| format!("{l}\n"))
        .collect();
    let content = format!("{partial}ZZ\td__B;p__P;c__C;o__O2;f__F3;g__Ge;s__Ge c\n");
    let taxonomy = write(dir.path(), "taxonomy.tsv", &content);

    phylorank()
        .args(["bl_optimal", &tree, "--rank", "g__", "--taxonomy-file", &taxonomy])
        .assert()
        .success()
        .stderr(predicate::str::contains("Leaf G9 has no entry in the taxonomy file"))
        .stderr(predicate::str::contains(
            "Taxonomy entry ZZ does not match any leaf in the tree",
        ))
        .stderr(predicate::str::contains(
            "1 leaves lack a taxonomy entry; 1 taxonomy entries are not in the tree",
        ));
}

#[test]
fn test_pull_and_taxon_stats() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let pulled = dir.path().join("pulled.tsv");

    phylorank()
        .args(["pull", &tree])
        .arg(&pulled)
        .assert()
        .success();
    let content = fs::read_to_string(&pulled).unwrap();
    assert!(content.contains("G1\td__;p__;c__;o__O1;f__F1;g__Ga;s__\n"));

    let taxonomy = write(dir.path(), "taxonomy.tsv", TAXONOMY);
    let stats = dir.path().join("stats.tsv");
    phylorank()
        .args(["taxon_stats", &taxonomy])
        .arg(&stats)
        .assert()
        .success();
    let content = fs::read_to_string(&stats).unwrap();
    assert!(content.starts_with("Taxa\t# named phylum"));
    assert!(content.contains("o__O1\t-\t-\t-\t2\t4\t7\t7\n"));
}

#[test]
fn test_bl_table_and_rd_ranks() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let table = dir.path().join("bl_table.tsv");

    phylorank()
        .args(["bl_table", &tree])
        .arg(&table)
        .args(["--step-size", "0.1"])
        .assert()
        .success();
    let content = fs::read_to_string(&table).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("Threshold\tLineages"));
    // Every leaf is its own lineage at threshold 0
    assert_eq!(lines.next(), Some("0.0000\t9"));

    let out_dir = dir.path().join("rd");
    phylorank()
        .args(["rd_ranks", &tree])
        .arg(&out_dir)
        .args(["--thresholds", r#"{"o__": 0.05, "g__": 0.5}"#, "--format", "tsv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("rank\tthreshold\tlineages"));
    assert!(out_dir.join("rd_ranks.tsv").exists());
}

#[test]
fn test_missing_input_file() {
    phylorank()
        .args(["scale", "does-not-exist.tree", "out.tree"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_tree_diff_reports_clade_changes() {
    let dir = TempDir::new().unwrap();
    let first = write(dir.path(), "first.tree", TREE);
    let second = write(
        dir.path(),
        "second.tree",
        "((((G1:0.1,G2:0.1,G3:0.1)g__Ga:0.3,G4:0.2)f__F1:0.4,\
((G5:0.2,G6:0.3):0.2,G7:0.6)f__F2:0.3)o__O1:0.2,(G8:0.5,G9:0.4)o__O2:0.9);",
    );
    let table = dir.path().join("diff.tsv");

    phylorank()
        .args(["tree_diff", &first, &second])
        .arg(&table)
        .args(["--named-only", "--format", "tsv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shared\t4\n"))
        .stdout(predicate::str::contains("members_differ\t1\n"))
        .stdout(predicate::str::contains("only_first\t2\n"))
        .stdout(predicate::str::contains("only_second\t0\n"));

    let content = fs::read_to_string(&table).unwrap();
    assert!(content.starts_with("Clade\tStatus\tTaxa in tree 1\tTaxa in tree 2"));
    assert!(content.contains("g__Ga\tmembers_differ\t2\t3\t95.0\tNA\t\tG3\n"));
    assert!(content.contains("g__Gb\tonly_first\t2\t0\tNA\tNA\t\t\n"));
    assert!(content.contains("o__O2\tshared\t2\t2\tNA\tNA\t\t\n"));
}

#[test]
fn test_bl_table_counts_lineages_per_category() {
    let dir = TempDir::new().unwrap();
    let tree = write(dir.path(), "in.tree", TREE);
    let categories = write(
        dir.path(),
        "categories.tsv",
        "G1\tsoil\nG2\tsoil\nG3\tsoil\nG4\tsoil\nG5\tgut\nG6\tgut\nG7\tgut\n",
    );
    let table = dir.path().join("bl_table.tsv");

    phylorank()
        .args(["bl_table", &tree])
        .arg(&table)
        .args(["--step-size", "0.1", "--taxon-category", &categories])
        .assert()
        .success()
        .stderr(predicate::str::contains("2 leaves have no category"));

    let content = fs::read_to_string(&table).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("Threshold\tLineages\tgut\tsoil"));
    assert_eq!(lines.next(), Some("0.0000\t9\t3\t4"));
    assert!(lines.all(|l| l.split('\t').count() == 4));
}
