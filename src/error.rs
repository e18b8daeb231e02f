//! Command Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The configuration could not be loaded.
    #[display("invalid configuration")]
    Config,
    /// The storage backend could not be set up.
    #[display("failed to open storage")]
    Storage,
    /// The configured storage kind was left out of this build.
    #[display("storage kind `{_0}` is not supported by this build")]
    Unsupported(#[error(not(source))] &'static str),
    /// A local file could not be read.
    #[display("failed to read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
    /// The trigger payload was not understood.
    #[display("invalid trigger payload")]
    Trigger,
    /// The package could not be turned into a cache record.
    #[display("failed to extract {}", _0.display())]
    Extract(#[error(not(source))] PathBuf),
    /// The reconciliation run failed.
    #[display("reconciliation run failed")]
    Run,
    #[display("failed to write output")]
    Output,
}
