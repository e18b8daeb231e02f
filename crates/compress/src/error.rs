//! Compression Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A compression error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for compression operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not the name of any compression format.
    #[display("unknown compression format `{_0}`")]
    Unknown(#[error(not(source))] String),
    /// A known format that this build was compiled without.
    #[display("compression format `{_0}` is not enabled in this build")]
    NotBuilt(#[error(not(source))] &'static str),
    /// The encoder or decoder could not be set up.
    #[display("failed to initialise codec")]
    Codec,
    /// The input is not valid data for the format.
    #[display("corrupt compressed data")]
    Corrupt,
    /// Writing encoded output failed.
    #[display("I/O error while encoding")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
