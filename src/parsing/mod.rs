//! Readers and writers for the file formats consumed and produced by the
//! rank analysis.
//!
//! This module provides parsers for:
//!
//! - **Newick trees**: rooted, multifurcating, with internal labels
//! - **Taxonomy files**: `id<TAB>d__...;p__...;...;s__...`
//! - **Taxon lists**: one taxon per line (trusted taxa, report allow-lists)
//! - **Threshold files**: JSON object of rank prefix to cut value
//!
//! Inputs whose name ends in `.gz` are decompressed transparently.
//!
//! ## Example
//!
//! ```rust
//! use phylorank::parsing::newick::{parse_newick_str, to_newick};
//!
//! let tree = parse_newick_str("((A:1,B:2)'95:g__X':0.5,C:3);").unwrap();
//! assert_eq!(tree.num_leaves(), 3);
//! assert_eq!(to_newick(&tree), "((A:1,B:2)'95:g__X':0.5,C:3);");
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;

pub mod lists;
pub mod newick;
pub mod taxonomy;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid Newick string at byte {position}: {message}")]
    InvalidNewick { position: usize, message: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid threshold specification: {0}")]
    InvalidThresholds(#[from] serde_json::Error),
}

impl ParseError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Open a file for buffered reading, decompressing `.gz` inputs.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be opened.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>, ParseError> {
    let file = File::open(path).map_err(|e| ParseError::io(path, e))?;
    let is_gzipped = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));

    if is_gzipped {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read a whole (possibly gzipped) text file.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be opened or decoded.
pub fn read_to_string(path: &Path) -> Result<String, ParseError> {
    let mut content = String::new();
    open_input(path)?
        .read_to_string(&mut content)
        .map_err(|e| ParseError::io(path, e))?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_read_gzipped_input() {
        let temp = tempfile::Builder::new().suffix(".tsv.gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(temp.reopen().unwrap(), Compression::default());
        encoder.write_all(b"G1\td__B\n").unwrap();
        encoder.finish().unwrap();

        let content = read_to_string(temp.path()).unwrap();
        assert_eq!(content, "G1\td__B\n");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = read_to_string(Path::new("/nonexistent/tree.nwk")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tree.nwk"));
    }
}
