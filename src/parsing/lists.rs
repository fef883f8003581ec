//! Small line-oriented inputs: taxon lists, leaf categories and rank
//! threshold tables.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::path::Path;

use crate::parsing::{open_input, read_to_string, ParseError};

/// Read a list of taxa, one per line.
///
/// Only the first tab-separated field of each line is used. Blank lines and
/// `#` comments are skipped.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be read.
pub fn read_taxa_list(path: &Path) -> Result<BTreeSet<String>, ParseError> {
    let reader = open_input(path)?;
    let mut taxa = BTreeSet::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ParseError::io(path, e))?;
        if let Some(taxon) = parse_list_line(&line) {
            taxa.insert(taxon.to_string());
        }
    }
    Ok(taxa)
}

fn parse_list_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.split('\t').next().map(str::trim).filter(|t| !t.is_empty())
}

/// Read a two-column `leaf<TAB>category` file.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be read and
/// `ParseError::InvalidFormat` for a line without a category.
pub fn read_category_file(path: &Path) -> Result<BTreeMap<String, String>, ParseError> {
    let reader = open_input(path)?;
    let mut categories = BTreeMap::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ParseError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (leaf, category) = line
            .split_once('\t')
            .map(|(l, c)| (l.trim(), c.split('\t').next().unwrap_or_default().trim()))
            .filter(|(l, c)| !l.is_empty() && !c.is_empty())
            .ok_or_else(|| {
                ParseError::InvalidFormat(format!(
                    "{}:{}: expected leaf and category separated by a tab",
                    path.display(),
                    index + 1
                ))
            })?;
        categories.insert(leaf.to_string(), category.to_string());
    }
    Ok(categories)
}

/// Parse a rank threshold specification.
///
/// Accepts, in order of precedence:
///
/// | Form | Example |
/// |------|---------|
/// | Path to a JSON file | `thresholds.json` |
/// | Inline JSON object | `{"p__": 0.35, "c__": 0.52}` |
/// | Inline list | `p__=0.35,c__=0.52` |
///
/// # Errors
///
/// Returns `ParseError::InvalidThresholds` for malformed JSON and
/// `ParseError::InvalidFormat` for malformed inline lists.
pub fn parse_threshold_spec(spec: &str) -> Result<BTreeMap<String, f64>, ParseError> {
    let path = Path::new(spec);
    if path.is_file() {
        let content = read_to_string(path)?;
        return Ok(serde_json::from_str(&content)?);
    }

    let spec = spec.trim();
    if spec.starts_with('{') {
        return Ok(serde_json::from_str(spec)?);
    }

    let mut thresholds = BTreeMap::new();
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (prefix, value) = item.split_once('=').ok_or_else(|| {
            ParseError::InvalidFormat(format!("Expected PREFIX=VALUE in threshold list, got '{item}'"))
        })?;
        let value: f64 = value.trim().parse().map_err(|_| {
            ParseError::InvalidFormat(format!("Invalid threshold value for {prefix}: '{value}'"))
        })?;
        thresholds.insert(prefix.trim().to_string(), value);
    }

    if thresholds.is_empty() {
        return Err(ParseError::InvalidFormat(
            "Threshold specification is empty".to_string(),
        ));
    }
    Ok(thresholds)
}
