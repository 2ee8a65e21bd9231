//! Core error types for Berth configuration and catalog operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Berth operations.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read config file '{path}': {reason}")]
    ConfigReadFailed { path: PathBuf, reason: String },

    #[error("failed to read env file '{path}': {reason}")]
    EnvFileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("TOML parse error in '{path}': {reason}")]
    TomlParseFailed { path: PathBuf, reason: String },

    // Catalog validation errors
    #[error("container '{name}' is claimed by both branch '{first}' and branch '{second}'")]
    DuplicateContainerName {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid branch '{branch}': {reason}")]
    InvalidBranch { branch: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a config read error.
    pub fn config_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an env file read error.
    pub fn env_file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::EnvFileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate container name error.
    pub fn duplicate_container_name(
        name: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self::DuplicateContainerName {
            name: name.into(),
            first: first.into(),
            second: second.into(),
        }
    }

    /// Create an invalid branch error.
    pub fn invalid_branch(branch: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBranch {
            branch: branch.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_container_name_display() {
        let err = Error::duplicate_container_name("dev0", "dev", "master");
        let message = err.to_string();
        assert!(message.contains("dev0"));
        assert!(message.contains("dev"));
        assert!(message.contains("master"));
    }

    #[test]
    fn test_invalid_branch_display() {
        let err = Error::invalid_branch("server", "readiness marker is empty");
        assert!(err.to_string().contains("server"));
        assert!(err.to_string().contains("readiness marker"));
    }
}
