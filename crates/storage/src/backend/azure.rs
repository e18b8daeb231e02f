//! Azure Blob Storage backend.
//!
//! Talks to a single container through [`object_store`]. Create-if-absent
//! writes use the service's conditional put (`If-None-Match: *`), which is
//! what makes cache record creation safe under concurrent runs.
//!
//! # Credentials
//!
//! Either a storage account shared key, or a managed identity obtained from
//! the instance metadata endpoint. The identity form optionally names the
//! client id of a user-assigned identity.

use crate::{
    FileInfo, StorageBackend,
    backend::{BoxSyncRead, FileInfoStream},
    error::{ErrorKind, Result},
    to_key, validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutPayload};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio_util::bytes::Buf;
use tokio_util::io::{StreamReader, SyncIoBridge};

/// How the backend authenticates against the storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzureCredential {
    /// Storage account access key (base64, as shown in the portal).
    SharedKey { key: String },
    /// Managed identity; `client_id` selects a user-assigned identity.
    Identity { client_id: Option<String> },
}

/// Azure Blob Storage backend scoped to one container.
///
/// # Examples
///
/// ```no_run
/// use aptblob_storage::backend::{AzureBackend, AzureCredential};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = AzureBackend::new(
///     "production",
///     "myaccount",
///     "apt",
///     None,
///     AzureCredential::Identity { client_id: None },
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AzureBackend {
    name: String,
    container: String,
    store: MicrosoftAzure,
}

impl AzureBackend {
    /// Create a new Azure storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `account` - Storage account name
    /// * `container` - Blob container holding the repository
    /// * `endpoint` - Custom endpoint URL, e.g. for a local emulator
    /// * `credential` - How to authenticate
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        container: impl Into<String>,
        endpoint: Option<String>,
        credential: AzureCredential,
    ) -> Result<Self> {
        let name = name.into();
        let container = container.into();
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(account.into())
            .with_container_name(container.clone());
        if let Some(endpoint) = endpoint {
            // Emulators are typically served over plain HTTP.
            builder = builder.with_allow_http(endpoint.starts_with("http://")).with_endpoint(endpoint);
        }
        builder = match credential {
            AzureCredential::SharedKey { key } => builder.with_access_key(key),
            AzureCredential::Identity { client_id: Some(id) } => builder.with_client_id(id),
            // Without explicit credentials the builder falls back to the
            // instance metadata endpoint.
            AzureCredential::Identity { client_id: None } => builder,
        };
        let store = builder
            .build()
            .or_raise(|| ErrorKind::BackendError(format!("failed to configure Azure backend `{name}`")))?;
        tracing::debug!(backend = %name, container = %container, "Configured Azure backend");
        Ok(Self { name, container, store })
    }

    fn object_path(path: &Path) -> Result<ObjectPath> {
        Ok(ObjectPath::from(to_key(path)?.as_str()))
    }

    fn file_info(meta: ObjectMeta) -> Result<FileInfo> {
        let path = validate_path(PathBuf::from(meta.location.as_ref()))?;
        let modified = OffsetDateTime::from_unix_timestamp(meta.last_modified.timestamp()).or_raise(|| {
            ErrorKind::BackendError(format!("blob `{}` has an out of range timestamp", meta.location))
        })?;
        Ok(FileInfo::new(path, meta.size, modified))
    }

    fn map_error(&self, err: object_store::Error, path: &Path) -> ErrorKind {
        match err {
            object_store::Error::NotFound { .. } => ErrorKind::NotFound(path.to_path_buf()),
            object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
                ErrorKind::AlreadyExists(path.to_path_buf())
            },
            object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
                ErrorKind::PermissionDenied(path.to_path_buf())
            },
            other => ErrorKind::Network(format!("{}/{}: {other}", self.container, path.display())),
        }
    }
}

#[async_trait]
impl StorageBackend for AzureBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(Self::object_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            let mut listing = self.store.list(prefix.as_ref());
            while let Some(item) = listing.next().await {
                match item {
                    Ok(meta) => yield Self::file_info(meta),
                    Err(err) => {
                        let at = PathBuf::from(prefix.as_ref().map(|p| p.to_string()).unwrap_or_default());
                        yield Err(exn::Exn::from(self.map_error(err, &at)));
                    },
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let location = Self::object_path(path)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => exn::bail!(self.map_error(err, path)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let location = Self::object_path(path)?;
        let result = self.store.get(&location).await.map_err(|e| self.map_error(e, path))?;
        let bytes = result.bytes().await.map_err(|e| self.map_error(e, path))?;
        Ok(bytes.to_vec())
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let location = Self::object_path(path)?;
        let result = self.store.get(&location).await.map_err(|e| self.map_error(e, path))?;
        Ok(blocking_reader(result.into_stream()))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let location = Self::object_path(path)?;
        self.store
            .put(&location, PutPayload::from(data.to_vec()))
            .await
            .map_err(|e| self.map_error(e, path))?;
        Ok(())
    }

    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        let location = Self::object_path(path)?;
        self.store
            .put_opts(&location, PutPayload::from(data.to_vec()), PutMode::Create.into())
            .await
            .map_err(|e| self.map_error(e, path))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let location = Self::object_path(path)?;
        self.store.delete(&location).await.map_err(|e| self.map_error(e, path))?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let location = Self::object_path(path)?;
        let meta = self.store.head(&location).await.map_err(|e| self.map_error(e, path))?;
        Self::file_info(meta)
    }
}

/// Adapts a streamed blob body for the blocking archive parser.
///
/// Chunks are pulled from the service as the parser consumes them. The
/// returned reader must only be read from outside the async runtime, such as
/// inside `spawn_blocking`.
fn blocking_reader<S, B>(body: S) -> BoxSyncRead
where
    S: Stream<Item = object_store::Result<B>> + Send + Unpin + 'static,
    B: Buf + Send + Unpin + 'static,
{
    let body = body.map(|chunk| chunk.map_err(std::io::Error::from));
    Box::new(SyncIoBridge::new(StreamReader::new(body)))
}
