//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for blob operations across different backends (local
//! filesystem, Azure Blob Storage, in-memory for tests) plus the decorators
//! that wrap them for retries and dry runs.

#[cfg(feature = "azure")]
mod azure;
mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod retry;
mod ro;

#[cfg(feature = "azure")]
pub use self::azure::{AzureBackend, AzureCredential};
pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockBackend, Operation};
pub use self::retry::{RetryPolicy, RetryingBackend};
pub use self::ro::ReadOnlyBackend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Unified interface for blob storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. Every operation acts on one whole blob;
/// there are no partial writes and no multi-blob transactions.
///
/// # Path Handling
/// All paths are relative to the storage root (the container) and must be
/// validated using [`validate_path`](crate::validate_path) before use.
/// Implementations enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use aptblob_storage::{backend::StorageBackend, error::Result};
///
/// async fn index_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = PathBuf::from("Packages.xz");
///     if backend.exists(&path).await? {
///         Ok(backend.stat(&path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List all blobs matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream blob metadata matching an optional prefix.
    ///
    /// If a prefix is provided, only blobs whose paths start with the prefix
    /// are returned. Prefix matching is component-based: the prefix
    /// `packages` matches `packages/foo.deb` but not `packages-old/foo.deb`.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use aptblob_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("packages")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a blob exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read blob contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a blob for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`](std::io::Read) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking). The async
    /// setup (opening the file/connection) happens before returning.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use aptblob_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let reader = backend.reader(Path::new("packages/foo_1.0_amd64.deb")).await?;
    /// let length = tokio::task::spawn_blocking(move || {
    ///     std::io::copy(&mut { reader }, &mut std::io::sink()).unwrap()
    /// }).await.unwrap();
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write blob contents, replacing any existing blob.
    ///
    /// Readers observe either the previous contents or the new contents,
    /// never a partial blob.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Write blob contents only if no blob exists at `path` yet.
    ///
    /// Returns [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) if
    /// the blob was already present, in which case it is left untouched. Of
    /// any number of concurrent callers at most one succeeds.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use aptblob_storage::error::ErrorKind;
    /// # use aptblob_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// match backend.write_new(Path::new("packages/foo.deb.package"), b"Package: foo\n").await {
    ///     Ok(()) => println!("created"),
    ///     Err(err) if matches!(&*err, ErrorKind::AlreadyExists(_)) => println!("someone beat us to it"),
    ///     Err(err) => return Err(err),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a blob.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get blob metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
