//! Result type definition and extension traits for best-effort operations.
//!
//! Removals against the container engine are best-effort: a failure is
//! logged and otherwise ignored. These combinators keep that pattern in
//! one place instead of a `match` at every call site.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for Berth core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results whose failure is logged and swallowed.
pub trait LoggedResultExt<T> {
    /// Convert a Result to an Option, logging the error at `warn` with context.
    fn ok_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> LoggedResultExt<T> for std::result::Result<T, E> {
    fn ok_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }
}
