//! Working out which packages still need a cache record.

use crate::error::{ErrorKind, Result};
use crate::layout::Layout;
use aptblob_storage::BackendHandle;
use exn::ResultExt;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::instrument;

/// What a single listing of the package prefix found. Every list is
/// sorted lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Every package blob.
    pub packages: Vec<PathBuf>,
    /// Every cache record blob.
    pub records: Vec<PathBuf>,
    /// Packages without a cache record.
    pub pending: Vec<PathBuf>,
    /// Cache records without a package.
    pub orphans: Vec<PathBuf>,
}

/// List the package prefix once and partition it.
///
/// Read-only. The listing is taken in one piece so a retrying backend can
/// repeat it; a failure that survives the retries aborts the scan.
#[instrument(skip_all, fields(backend = backend.name(), prefix = ?layout.prefix()))]
pub async fn scan(backend: &BackendHandle, layout: &Layout) -> Result<Inventory> {
    let (packages, records) = list(backend, layout).await?;

    let pending: Vec<_> =
        packages.iter().filter(|package| !records.contains(&layout.record_path(package))).cloned().collect();
    let orphans: Vec<_> = records
        .iter()
        .filter(|record| layout.package_for_record(record).is_none_or(|package| !packages.contains(&package)))
        .cloned()
        .collect();

    tracing::info!(
        packages = packages.len(),
        records = records.len(),
        pending = pending.len(),
        orphans = orphans.len(),
        "Scanned package prefix"
    );
    for orphan in &orphans {
        tracing::warn!(record = %orphan.display(), "Cache record has no matching package");
    }
    Ok(Inventory {
        packages: packages.into_iter().collect(),
        records: records.into_iter().collect(),
        pending,
        orphans,
    })
}

/// List only the cache records, sorted.
///
/// Used again right before assembly so that records created by concurrent
/// runs since the scan make it into the index.
#[instrument(skip_all, fields(backend = backend.name(), prefix = ?layout.prefix()))]
pub async fn list_records(backend: &BackendHandle, layout: &Layout) -> Result<Vec<PathBuf>> {
    let (_, records) = list(backend, layout).await?;
    Ok(records.into_iter().collect())
}

async fn list(backend: &BackendHandle, layout: &Layout) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    let mut packages = BTreeSet::new();
    let mut records = BTreeSet::new();
    for file in backend.list(layout.prefix()).await.or_raise(|| ErrorKind::Listing)? {
        if layout.is_package(&file.path) {
            packages.insert(file.path);
        } else if layout.is_record(&file.path) {
            records.insert(file.path);
        }
    }
    Ok((packages, records))
}
