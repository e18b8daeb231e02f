//! Blob metadata returned by storage backends.

use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Blob metadata returned by listing and `stat` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root (the blob name)
    pub path: PathBuf,
    /// Blob size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// Whether the final component of the blob name ends with `suffix`.
    ///
    /// Matches on the raw name rather than [`Path::extension`] so that
    /// multi-dot suffixes such as `.deb.package` work.
    pub fn has_suffix(&self, suffix: &str) -> bool {
        has_suffix(&self.path, suffix)
    }
}

pub(crate) fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > suffix.len() && name.ends_with(suffix))
}
