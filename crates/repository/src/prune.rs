//! Removing cache records whose package is gone.

use crate::error::{ErrorKind, Result};
use aptblob_storage::BackendHandle;
use aptblob_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;
use std::path::PathBuf;
use tracing::instrument;

/// Delete orphaned cache records, returning the ones actually removed.
///
/// A record that is already gone was pruned by a concurrent run, which is
/// fine.
#[instrument(skip_all, fields(backend = backend.name(), orphans = orphans.len()))]
pub async fn prune(backend: &BackendHandle, orphans: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut pruned = Vec::with_capacity(orphans.len());
    for record in orphans {
        match backend.delete(record).await {
            Ok(()) => {
                tracing::info!(record = %record.display(), "Pruned orphaned cache record");
                pruned.push(record.clone());
            },
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                tracing::debug!(record = %record.display(), "Orphaned cache record already removed");
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Storage(record.clone())),
        }
    }
    Ok(pruned)
}
