//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Blob does not exist
    #[display("blob not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Blob already exists (create-if-absent writes)
    #[display("blob already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (blob service connections, throttling, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::NotFound("packages/foo.deb".into()), false)]
    #[case(ErrorKind::AlreadyExists("packages/foo.deb.package".into()), false)]
    #[case(ErrorKind::InvalidPath("../escape".into()), false)]
    #[case(ErrorKind::Network("connection reset".to_string()), true)]
    #[case(ErrorKind::Io(IoError::other("disk hiccup")), true)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_display() {
        let kind = ErrorKind::AlreadyExists("packages/foo.deb.package".into());
        assert_eq!(kind.to_string(), "blob already exists: packages/foo.deb.package");
    }
}
