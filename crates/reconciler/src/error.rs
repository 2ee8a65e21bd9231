//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Readiness timeouts and failure markers are not errors; they are
/// reported through [`crate::lifecycle::Readiness`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The engine could not be reached at all.
    #[error("container engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// An engine call was made and failed.
    #[error("engine request '{operation}' failed: {reason}")]
    EngineRequestFailed { operation: String, reason: String },

    /// No configured branch matches a tag or container name.
    #[error("no branch configured for '{key}'")]
    BranchNotFound { key: String },

    /// The engine reported an error while pulling.
    #[error("pull of '{image}' failed: {reason}")]
    PullFailed { image: String, reason: String },

    /// A pull progress event the driver does not understand.
    #[error("pull protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// A reconciler was assembled without a required part.
    #[error("invalid reconciler configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create an engine unavailable error.
    pub fn engine_unavailable(reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an engine request failed error.
    pub fn engine_request(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineRequestFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a branch not found error.
    pub fn branch_not_found(key: impl Into<String>) -> Self {
        Self::BranchNotFound { key: key.into() }
    }

    /// Create a pull failed error.
    pub fn pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the error means the engine contract itself is broken.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::engine_request("start_container", "connection reset");
        assert!(err.to_string().contains("start_container"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_only_protocol_violation_is_fatal() {
        assert!(Error::protocol_violation("Verifying has progress").is_fatal());
        assert!(!Error::branch_not_found("nightly").is_fatal());
        assert!(!Error::engine_unavailable("no socket").is_fatal());
    }
}
