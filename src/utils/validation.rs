//! Centralized input checks run before any tree is loaded.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Input file does not exist: {0}")]
    MissingFile(PathBuf),

    #[error("Input path is not a file: {0}")]
    NotAFile(PathBuf),

    #[error("Could not create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fail early if an input file is missing.
///
/// # Errors
///
/// Returns `InputError::MissingFile` if nothing exists at `path`, or
/// `InputError::NotAFile` if it is a directory.
pub fn check_file_exists(path: &Path) -> Result<(), InputError> {
    if !path.exists() {
        return Err(InputError::MissingFile(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(InputError::NotAFile(path.to_path_buf()));
    }
    Ok(())
}

/// Create a directory (and parents) if it does not already exist.
///
/// # Errors
///
/// Returns `InputError::CreateDir` if the directory cannot be created.
pub fn make_sure_path_exists(path: &Path) -> Result<(), InputError> {
    fs::create_dir_all(path).map_err(|source| InputError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
