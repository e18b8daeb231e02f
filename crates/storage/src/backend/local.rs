//! Local filesystem storage backend.
//!
//! Blobs are stored as files below a configured root directory and accessed
//! using `tokio::fs` for async I/O. Writes go to a hidden `.partial` sibling
//! first so that readers never see a half-written blob.

use crate::backend::{BoxSyncRead, FileInfoStream};
use crate::error::ErrorKind;
use crate::file::has_suffix;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, DirEntry};

const PARTIAL_SUFFIX: &str = ".partial";

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// Stores blobs in a directory on the local filesystem. All paths are
/// relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use aptblob_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/apt")?;
/// # Ok(())
/// # }
/// ```
pub struct LocalBackend {
    name: String,
    /// Root directory standing in for the container
    root: PathBuf,
    /// Distinguishes concurrent temporary files written by this process
    counter: AtomicU64,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once during startup; not worth making the
            // constructor async for.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }

        Ok(Self {
            name: name.into(),
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        Ok(validate_path(relative)?)
    }

    /// Hidden sibling path that a blob is staged at before it is moved into
    /// place. Unique per process and per call.
    fn partial_path(&self, target: &Path) -> PathBuf {
        let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("blob");
        let unique = self.counter.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{name}.{}.{unique}{PARTIAL_SUFFIX}", std::process::id()))
    }

    /// Stage `data` next to `path`, creating parent directories as needed.
    async fn stage(&self, path: &Path, abs_path: &Path, data: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        let partial = self.partial_path(abs_path);
        fs::write(&partial, data).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(partial)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classifies a single directory entry; kept out of the stream body so
    /// that `?` can be used.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
            && !pfx.starts_with(&relative)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        // Staged writes are not blobs yet.
        if metadata.is_file() && !has_suffix(&relative, PARTIAL_SUFFIX) {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent directory of the prefix, so that a prefix
        // naming a single file (or nothing at all yet) is not an error.
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A missing directory is an empty listing, the same as an
                    // unused prefix in a blob container.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        match fs::metadata(&abs_path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => exn::bail!(Self::map_io_error(err, path)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let partial = self.stage(path, &abs_path, data).await?;
        if let Err(err) = fs::rename(&partial, &abs_path).await {
            let _ = fs::remove_file(&partial).await;
            exn::bail!(Self::map_io_error(err, path));
        }
        Ok(())
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let partial = self.stage(path, &abs_path, data).await?;
        // Linking fails if the target exists, which makes this the single
        // point where concurrent creators are decided.
        let linked = fs::hard_link(&partial, &abs_path).await;
        if let Err(err) = fs::remove_file(&partial).await {
            tracing::warn!(path = %partial.display(), error = %err, "Failed to remove staged blob");
        }
        linked.map_err(|e| Self::map_io_error(e, path))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::metadata(&validate_path(path)?, metadata)
    }
}
