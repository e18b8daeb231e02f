//! In-memory storage backend for testing.

use super::{BoxSyncRead, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Operation categories that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Read,
    Write,
    Delete,
}

struct Fault {
    operation: Operation,
    path: Option<PathBuf>,
    remaining: usize,
}

/// In-memory storage backend for testing.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Failures can be
/// injected per operation (and optionally per path) with
/// [`fail()`](Self::fail) to exercise error handling.
///
/// # Examples
///
/// ```
/// use aptblob_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("packages/foo_1.0_amd64.deb", b"!<arch>\n"),
/// ]);
/// assert!(backend.exists(Path::new("packages/foo_1.0_amd64.deb")).await?);
///
/// backend.write(Path::new("Packages"), b"Package: foo\n").await?;
/// assert!(backend.exists(Path::new("Packages")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    faults: Mutex<Vec<Fault>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with blobs.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make the next `times` calls of `operation` fail with a retryable
    /// network error. When `path` is given only calls for that blob fail;
    /// list faults ignore the path.
    ///
    /// ```
    /// use aptblob_storage::backend::{MockBackend, Operation, StorageBackend};
    /// use std::path::Path;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let backend = MockBackend::with_files([("Packages", b"old")]);
    /// backend.fail(Operation::Write, Some("Packages"), 1);
    /// assert!(backend.write(Path::new("Packages"), b"new").await.is_err());
    /// assert!(backend.write(Path::new("Packages"), b"new").await.is_ok());
    /// # }
    /// ```
    pub fn fail(&self, operation: Operation, path: Option<&str>, times: usize) {
        let path = path.map(|p| match validate_path(p) {
            Ok(validated) => validated,
            Err(_) => panic!("MockBackend::fail: invalid path {p}"),
        });
        self.lock_faults().push(Fault { operation, path, remaining: times });
    }

    /// Snapshot of every blob name currently stored, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.storage.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Vec<Fault>> {
        // A panicking test thread poisons the lock; the fault list itself is
        // still consistent.
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consume one matching fault, if any is armed.
    fn trip(&self, operation: Operation, path: Option<&Path>) -> Result<()> {
        let mut faults = self.lock_faults();
        let armed = faults.iter_mut().find(|fault| {
            fault.operation == operation
                && fault.remaining > 0
                && match (&fault.path, path) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                }
        });
        if let Some(fault) = armed {
            fault.remaining -= 1;
            let target = path.map(|p| p.display().to_string()).unwrap_or_default();
            exn::bail!(ErrorKind::Network(format!("injected {operation:?} fault {target}")));
        }
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        if let Err(e) = self.trip(Operation::List, None) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<(PathBuf, OffsetDateTime, u64)> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (inserted, data))| (path.clone(), *inserted, data.len() as u64))
                    .collect()
            };
            for (path, inserted, size) in entries {
                yield Ok(FileInfo::new(path, size, inserted));
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        self.trip(Operation::Read, Some(&path))?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        self.trip(Operation::Read, Some(&path))?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.trip(Operation::Write, Some(&path))?;
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.trip(Operation::Write, Some(&path))?;
        let mut guard = self.storage.write().await;
        if guard.contains_key(&path) {
            exn::bail!(ErrorKind::AlreadyExists(path));
        }
        guard.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.trip(Operation::Delete, Some(&path))?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        self.trip(Operation::Read, Some(&path))?;
        let guard = self.storage.read().await;
        let (inserted, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *inserted))
    }
}
