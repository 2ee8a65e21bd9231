//! `KEY=VALUE` env files handed to containers.

use std::path::Path;

use crate::error::Error;
use crate::result::Result;

/// Parse env file contents into `KEY=VALUE` entries, in file order.
///
/// Blank lines and `#` comments are skipped; entries are otherwise passed
/// through untouched, since the engine does its own splitting.
pub fn parse_env_entries(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Read and parse an env file.
///
/// # Errors
///
/// Returns [`Error::EnvFileReadFailed`] if the file cannot be read.
pub fn read_env_file(path: &Path) -> Result<Vec<String>> {
    std::fs::read_to_string(path)
        .map(|contents| parse_env_entries(&contents))
        .map_err(|e| Error::env_file_read_failed(path, e.to_string()))
}
