//! Read-only storage decorator used for dry runs.
//!
//! Wraps another backend, forwards every read and turns every mutation into
//! a logged no-op that reports success.

use async_trait::async_trait;
use std::path::Path;

use crate::{
    BackendHandle, StorageBackend,
    backend::{BoxSyncRead, FileInfoStream},
    error::Result,
    file::FileInfo,
};

/// Read-only storage backend.
///
/// Wraps another backend and silently drops all write operations, logging an
/// [`info event`](tracing::Event) for each so a dry run shows exactly which
/// blobs a real run would have touched.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        self.inner.reader(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(path = %path.display(), bytes = data.len(), "Skipping write during read-only mode");
        Ok(())
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(path = %path.display(), bytes = data.len(), "Skipping create during read-only mode");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Skipping delete during read-only mode");
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.inner.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mutations_are_dropped() {
        let inner = Arc::new(MockBackend::with_files([("Packages", Vec::from(*b"old"))]));
        let backend = ReadOnlyBackend::new(inner.clone());
        backend.write(Path::new("Packages"), b"new").await.unwrap();
        backend.write_new(Path::new("foo.deb.package"), b"record").await.unwrap();
        backend.delete(Path::new("Packages")).await.unwrap();
        assert_eq!(inner.read(Path::new("Packages")).await.unwrap(), b"old");
        assert!(!inner.exists(Path::new("foo.deb.package")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reads_pass_through() {
        let inner = Arc::new(MockBackend::with_files([("Packages", Vec::from(*b"index"))]));
        let backend = ReadOnlyBackend::new(inner);
        assert_eq!(backend.read(Path::new("Packages")).await.unwrap(), b"index");
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
        assert_eq!(backend.name(), "mock");
    }
}
