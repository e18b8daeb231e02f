//! Blob storage for the package repository.
//!
//! Everything the repository engine knows about the outside world goes
//! through [`StorageBackend`]: listing, reading, overwriting and
//! create-if-absent writes of single blobs. Backends are stacked as
//! decorators, e.g. an [`AzureBackend`](backend::AzureBackend) wrapped in a
//! [`RetryingBackend`](backend::RetryingBackend) wrapped in a
//! [`ReadOnlyBackend`](backend::ReadOnlyBackend) for dry runs.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::{to_key, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
