//! Repository Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Everything here is fatal for a run; problems with a
//! single package or cache record are reported, not raised.

use aptblob_compress::Compression;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A repository error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a failed run.
///
/// ### Input Errors
/// - [`ErrorKind::InvalidTrigger`]
/// - [`ErrorKind::Layout`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Listing`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Incomplete`]
/// - [`ErrorKind::Compression`]
/// - [`ErrorKind::Publish`]
/// - [`ErrorKind::Task`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The trigger payload matches none of the known shapes.
    #[display("unrecognized trigger payload: {_0}")]
    InvalidTrigger(#[error(not(source))] String),
    /// The configured prefix or index path cannot name a blob.
    #[display("invalid repository layout: {_0}")]
    Layout(#[error(not(source))] String),
    /// Listing the container failed.
    #[display("failed to list blobs")]
    Listing,
    /// A read, write or delete of one blob failed.
    #[display("storage operation failed for {}", _0.display())]
    Storage(#[error(not(source))] PathBuf),
    /// Some packages hit storage failures during extraction.
    #[display("{_0} package(s) could not be processed")]
    Incomplete(#[error(not(source))] usize),
    /// Producing a compressed index failed.
    #[display("failed to compress index as {_0}")]
    Compression(#[error(not(source))] Compression),
    /// Writing an index artifact failed.
    #[display("failed to publish {}", _0.display())]
    Publish(#[error(not(source))] PathBuf),
    /// A blocking task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Listing | Self::Storage(_) | Self::Incomplete(_) | Self::Publish(_) | Self::Task
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::InvalidTrigger("{}".to_string()), false)]
    #[case(ErrorKind::Layout("..".to_string()), false)]
    #[case(ErrorKind::Listing, true)]
    #[case(ErrorKind::Publish("Packages".into()), true)]
    #[case(ErrorKind::Compression(Compression::Xz), false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Compression(Compression::Xz).to_string(), "failed to compress index as xz");
        assert_eq!(ErrorKind::Storage("packages/foo.deb".into()).to_string(), "storage operation failed for packages/foo.deb");
    }
}
