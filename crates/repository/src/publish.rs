//! Writing index artifacts back to the container.

use crate::assemble;
use crate::error::{ErrorKind, Result};
use crate::layout::Layout;
use aptblob_compress::Compression;
use aptblob_storage::BackendHandle;
use exn::ResultExt;
use serde::Serialize;
use std::path::PathBuf;
use tracing::instrument;

/// One published file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    #[serde(serialize_with = "serialize_compression")]
    pub compression: Compression,
    pub size: u64,
}

/// Publish the index and each of its compressed encodings, overwriting
/// whatever is there.
///
/// Every encoding is produced before anything is written, so a compression
/// failure publishes nothing. The plain index is written first; each write
/// replaces one blob atomically.
#[instrument(skip_all, fields(backend = backend.name(), index = %layout.index_path().display(), bytes = index.len()))]
pub async fn publish(backend: &BackendHandle, layout: &Layout, index: Vec<u8>) -> Result<Vec<Artifact>> {
    let compressions = layout.compressions().to_vec();
    let encoded = tokio::task::spawn_blocking(move || {
        let compressed = assemble::compress(&index, &compressions)?;
        Ok::<_, crate::error::Error>(std::iter::once((Compression::None, index)).chain(compressed).collect::<Vec<_>>())
    })
    .await
    .or_raise(|| ErrorKind::Task)??;

    let mut artifacts = Vec::with_capacity(encoded.len());
    for ((compression, bytes), (_, path)) in encoded.into_iter().zip(layout.artifacts()) {
        backend.write(&path, &bytes).await.or_raise(|| ErrorKind::Publish(path.clone()))?;
        tracing::info!(path = %path.display(), size = bytes.len(), "Published index artifact");
        artifacts.push(Artifact { path, compression, size: bytes.len() as u64 });
    }
    Ok(artifacts)
}

fn serialize_compression<S: serde::Serializer>(compression: &Compression, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(compression.as_str())
}
