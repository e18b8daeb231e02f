//! Extraction Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Apart from [`Io`](ErrorKind::Io), every kind means the
//! input itself is bad: the package (or cache record) should be skipped, and
//! retrying with the same bytes will fail the same way.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input does not start with the `ar` archive signature.
    #[display("not a Debian package archive")]
    NotAnArchive,
    /// The `ar` container or one of its members is structurally broken.
    #[display("malformed archive: {_0}")]
    MalformedArchive(#[error(not(source))] String),
    /// No `control.tar*` member was found.
    #[display("archive has no control member")]
    MissingControl,
    /// The control member could not be decompressed or untarred.
    #[display("failed to unpack control member")]
    Decompression,
    /// A control file or cache record is not a valid single paragraph.
    #[display("malformed control data at line {line}: {reason}")]
    MalformedControl {
        /// 1-based line number.
        line: usize,
        reason: String,
    },
    /// A required field is absent.
    #[display("missing required field: {_0}")]
    MissingField(#[error(not(source))] &'static str),
    /// A field was found but its value is not acceptable.
    #[display("invalid value for field '{field}': {value}")]
    InvalidField {
        field: &'static str,
        value: String,
    },
    /// Some part of the archive exceeds its size limit.
    #[display("{what} exceeds the {limit} byte limit")]
    TooLarge {
        what: &'static str,
        limit: u64,
    },
    /// Reading the underlying stream failed.
    #[display("I/O error while reading package")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
