//! Configuration Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. None of these are retryable: a bad configuration
//! stays bad until someone edits it.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The config file has an extension we do not know how to read.
    #[display("unsupported config file format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// An explicitly requested config file does not exist.
    #[display("config file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Merging or deserializing the configuration layers failed.
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// A value was read successfully but is not acceptable.
    #[display("invalid configuration for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ErrorKind {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { key, reason: reason.into() }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
