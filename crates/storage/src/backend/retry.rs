//! Retrying storage decorator.
//!
//! Transient failures (network resets, throttling, I/O hiccups) are retried
//! with jittered exponential backoff. Errors that retrying cannot fix, such
//! as a missing blob or a create-if-absent conflict, are returned at once.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use crate::{
    BackendHandle, StorageBackend,
    backend::{BoxSyncRead, FileInfoStream},
    error::{Error, Result},
    file::FileInfo,
};

/// How many times, and how patiently, to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retrying.
    pub attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}
impl RetryPolicy {
    fn strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        // Delays grow as initial * 2^n.
        let factor = (self.initial_backoff.as_millis() / 2).max(1) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_backoff)
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }
}

/// Storage backend that retries transient failures of the wrapped backend.
///
/// Streaming listings are passed through untouched, since a half-consumed
/// stream cannot be replayed; [`list()`](StorageBackend::list) is retried as
/// a whole.
#[derive(Clone)]
pub struct RetryingBackend {
    inner: BackendHandle,
    policy: RetryPolicy,
}
impl RetryingBackend {
    pub fn new(inner: BackendHandle, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

fn retryable(err: &Error) -> bool {
    let retry = err.is_retryable();
    if retry {
        tracing::debug!(error = %**err, "Retrying storage operation");
    }
    retry
}

#[async_trait]
impl StorageBackend for RetryingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.list(prefix), retryable).await
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.exists(path), retryable).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.read(path), retryable).await
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.reader(path), retryable).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.write(path, data), retryable).await
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.write_new(path, data), retryable).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.delete(path), retryable).await
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        RetryIf::spawn(self.policy.strategy(), || self.inner.stat(path), retryable).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Operation};
    use crate::error::ErrorKind;
    use std::sync::Arc;

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_strategy_length() {
        assert_eq!(quick(1).strategy().count(), 0);
        assert_eq!(quick(4).strategy().count(), 3);
        assert!(RetryPolicy::default().strategy().all(|d| d <= Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(MockBackend::with_files([("Packages", Vec::from(*b"index"))]));
        inner.fail(Operation::Read, Some("Packages"), 2);
        let backend = RetryingBackend::new(inner, quick(3));
        assert_eq!(backend.read(Path::new("Packages")).await.unwrap(), b"index");
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let inner = Arc::new(MockBackend::default());
        inner.fail(Operation::Write, None, 5);
        let backend = RetryingBackend::new(inner.clone(), quick(3));
        let err = backend.write(Path::new("Packages"), b"index").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        // Two faults remain armed
        assert!(inner.write(Path::new("Packages"), b"index").await.is_err());
        assert!(inner.write(Path::new("Packages"), b"index").await.is_err());
        assert!(inner.write(Path::new("Packages"), b"index").await.is_ok());
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let inner = Arc::new(MockBackend::with_files([("foo.deb.package", Vec::from(*b"record"))]));
        let backend = RetryingBackend::new(inner, quick(3));
        let err = backend.write_new(Path::new("foo.deb.package"), b"other").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        let err = backend.read(Path::new("missing.deb")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_retried() {
        let inner = Arc::new(MockBackend::with_files([("packages/foo.deb", Vec::from(*b"deb"))]));
        inner.fail(Operation::List, None, 1);
        let backend = RetryingBackend::new(inner, quick(2));
        assert_eq!(backend.list(Some(Path::new("packages"))).await.unwrap().len(), 1);
    }
}
