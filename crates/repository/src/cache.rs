//! Create-if-absent writes of cache records.

use crate::error::{ErrorKind, Result};
use aptblob_extract::CacheRecord;
use aptblob_storage::BackendHandle;
use aptblob_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

/// What happened when a record was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This call created the record.
    Created,
    /// Another writer got there first. Records are pure functions of the
    /// package, so the stored one is just as good.
    AlreadyPresent,
}

/// Store `record` at `path` unless something is already there.
///
/// Losing a race is not an error; every other storage failure is.
#[instrument(skip(backend, record), fields(path = %path.display()))]
pub async fn write_record(backend: &BackendHandle, path: &Path, record: &CacheRecord) -> Result<WriteOutcome> {
    match backend.write_new(path, &record.to_bytes()).await {
        Ok(()) => {
            tracing::info!(package = ?record.package(), "Created cache record");
            Ok(WriteOutcome::Created)
        },
        Err(err) if matches!(&*err, StorageErrorKind::AlreadyExists(_)) => {
            tracing::debug!("Cache record was created concurrently");
            Ok(WriteOutcome::AlreadyPresent)
        },
        Err(err) => Err(err).or_raise(|| ErrorKind::Storage(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptblob_extract::{ControlFields, Digests};
    use aptblob_storage::StorageBackend;
    use aptblob_storage::backend::{MockBackend, Operation};
    use std::sync::Arc;

    fn record(version: &str) -> CacheRecord {
        let control = ControlFields::parse(&format!("Package: foo\nVersion: {version}\n")).unwrap();
        CacheRecord::new(control, "packages/foo.deb", Digests::of(b"foo"))
    }

    #[tokio::test]
    async fn test_create_then_already_present() {
        let mock = Arc::new(MockBackend::default());
        let backend: BackendHandle = mock.clone();
        let path = Path::new("packages/foo.deb.package");

        assert_eq!(write_record(&backend, path, &record("1")).await.unwrap(), WriteOutcome::Created);
        assert_eq!(write_record(&backend, path, &record("2")).await.unwrap(), WriteOutcome::AlreadyPresent);
        // The first record wins and is never overwritten.
        assert_eq!(mock.read(path).await.unwrap(), record("1").to_bytes());
    }

    #[tokio::test]
    async fn test_storage_failure() {
        let mock = MockBackend::default();
        mock.fail(Operation::Write, None, 1);
        let backend: BackendHandle = Arc::new(mock);
        let err = write_record(&backend, Path::new("packages/foo.deb.package"), &record("1")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage(_)));
        assert!(err.is_retryable());
    }
}
