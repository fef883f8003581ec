use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::core::taxonomy::Taxonomy;
use crate::parsing::{read_to_string, ParseError};

/// Parse a taxonomy file with columns: id, `;`-separated lineage
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be read, or
/// `ParseError::InvalidFormat` if the content is invalid.
pub fn read_taxonomy_file(path: &Path) -> Result<Taxonomy, ParseError> {
    let content = read_to_string(path)?;
    parse_taxonomy_text(&content)
}

/// Parse taxonomy text with columns: id, `;`-separated lineage
///
/// Blank lines and lines starting with `#` are ignored. Lineage elements are
/// trimmed but otherwise kept verbatim, so malformed entries survive for
/// [`Taxonomy::validate`] to report.
///
/// # Errors
///
/// Returns `ParseError::InvalidFormat` if a line has fewer than 2 fields.
pub fn parse_taxonomy_text(text: &str) -> Result<Taxonomy, ParseError> {
    let mut lineages = BTreeMap::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        // Line numbers in errors are 1-based for user friendliness
        let line_num = i + 1;

        let Some((id, lineage)) = line.split_once('\t') else {
            return Err(ParseError::InvalidFormat(format!(
                "Line {line_num} of taxonomy file has fewer than 2 fields"
            )));
        };

        let id = id.trim().to_string();
        let lineage: Vec<String> = lineage
            .split('\t')
            .next()
            .unwrap_or_default()
            .split(';')
            .map(|t| t.trim().to_string())
            .collect();

        if lineages.insert(id.clone(), lineage).is_some() {
            warn!("Duplicate taxonomy entry for {id} on line {line_num}; keeping the last one");
        }
    }

    Ok(Taxonomy::from_lineages(lineages))
}

/// Write a taxonomy as `id<TAB>lineage` rows sorted by identifier.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be written.
pub fn write_taxonomy_file(taxonomy: &Taxonomy, path: &Path) -> Result<(), ParseError> {
    let file = File::create(path).map_err(|e| ParseError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_taxonomy(taxonomy, &mut writer).map_err(|e| ParseError::io(path, e))
}

/// Write a taxonomy in TSV form to any writer.
///
/// # Errors
///
/// Returns any I/O error raised by `writer`.
pub fn write_taxonomy<W: Write>(taxonomy: &Taxonomy, writer: &mut W) -> std::io::Result<()> {
    for (id, lineage) in taxonomy.iter() {
        writeln!(writer, "{id}\t{}", lineage.join(";"))?;
    }
    writer.flush()
}
