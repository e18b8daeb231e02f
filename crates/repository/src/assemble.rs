//! Building the package index from cache records.
//!
//! The index is rebuilt from scratch on every run. Its bytes depend only on
//! the set of records, never on listing order or timing, so two runs that
//! see the same records publish identical artifacts.

use crate::error::{ErrorKind, Result};
use crate::layout::Layout;
use aptblob_compress::Compression;
use aptblob_extract::CacheRecord;
use aptblob_storage::BackendHandle;
use aptblob_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;
use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// A cache record blob that was left out of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    pub record: PathBuf,
    pub reason: String,
}

/// The records that made it into the index, plus the ones that did not.
#[derive(Debug, Default)]
pub struct Loaded {
    pub records: Vec<(PathBuf, CacheRecord)>,
    pub rejected: Vec<Rejected>,
}

/// Read and parse every cache record, `concurrency` at a time.
///
/// Records that fail to parse are rejected and logged, as are records whose
/// `Filename` is not the package they are named after. A record that has
/// disappeared since the listing is skipped. Any other storage failure is
/// fatal.
#[instrument(skip_all, fields(records = paths.len()))]
pub async fn load_records(
    backend: &BackendHandle,
    layout: &Layout,
    paths: &[PathBuf],
    concurrency: usize,
) -> Result<Loaded> {
    let reads = stream::iter(paths.iter().cloned())
        .map(|path| read_record(backend.clone(), path).boxed())
        .buffered(concurrency.max(1));
    let blobs: Vec<_> = reads.try_collect().await?;

    let mut loaded = Loaded::default();
    for (path, bytes) in blobs.into_iter().flatten() {
        let reason = match CacheRecord::parse(&bytes) {
            Ok(record) => match check_filename(layout, &path, &record) {
                None => {
                    loaded.records.push((path, record));
                    continue;
                },
                Some(reason) => reason,
            },
            Err(err) => (*err).to_string(),
        };
        tracing::warn!(record = %path.display(), %reason, "Skipping cache record");
        loaded.rejected.push(Rejected { record: path, reason });
    }
    Ok(loaded)
}

async fn read_record(backend: BackendHandle, path: PathBuf) -> Result<Option<(PathBuf, Vec<u8>)>> {
    match backend.read(&path).await {
        Ok(bytes) => Ok(Some((path, bytes))),
        Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
            tracing::info!(record = %path.display(), "Cache record vanished before it could be read");
            Ok(None)
        },
        Err(err) => Err(err).or_raise(|| ErrorKind::Storage(path.clone())),
    }
}

/// A record only describes the package it is named after. Copies under
/// another name would list the same package twice.
fn check_filename(layout: &Layout, path: &Path, record: &CacheRecord) -> Option<String> {
    let expected = layout.package_for_record(path).and_then(|package| layout.filename(&package).ok());
    match expected {
        Some(expected) if expected == record.filename() => None,
        Some(expected) => Some(format!("Filename `{}` does not match `{expected}`", record.filename())),
        None => Some(format!("`{}` is not a cache record name", path.display())),
    }
}

/// Order records by `Filename`, then by record blob name, and join them
/// with blank lines.
pub fn assemble(records: &mut [(PathBuf, CacheRecord)]) -> Vec<u8> {
    records.sort_by(|(a_path, a), (b_path, b)| a.filename().cmp(b.filename()).then_with(|| a_path.cmp(b_path)));
    let mut index = Vec::new();
    for (position, (_, record)) in records.iter().enumerate() {
        if position > 0 {
            index.push(b'\n');
        }
        index.extend_from_slice(&record.to_bytes());
    }
    index
}

/// Compress the index once per encoding, in the given order.
pub fn compress(index: &[u8], compressions: &[Compression]) -> Result<Vec<(Compression, Vec<u8>)>> {
    compressions
        .iter()
        .map(|&compression| {
            let bytes = compression.compress(index).or_raise(|| ErrorKind::Compression(compression))?;
            Ok((compression, bytes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptblob_extract::{ControlFields, Digests};
    use aptblob_storage::backend::{MockBackend, Operation};
    use rstest::rstest;
    use std::sync::Arc;

    fn layout() -> Layout {
        Layout::new("packages", "Packages", [Compression::Xz]).unwrap()
    }

    fn record(package: &str, filename: &str) -> CacheRecord {
        let control = ControlFields::parse(&format!("Package: {package}\nVersion: 1.0\n")).unwrap();
        CacheRecord::new(control, filename, Digests::of(package.as_bytes()))
    }

    #[test]
    fn test_order_and_separators() {
        let mut records = vec![
            (PathBuf::from("p/b.deb.package"), record("b", "p/b.deb")),
            (PathBuf::from("p/a.deb.package"), record("a", "p/a.deb")),
        ];
        let index = String::from_utf8(assemble(&mut records)).unwrap();
        let expected = format!("{}\n{}", record("a", "p/a.deb"), record("b", "p/b.deb"));
        assert_eq!(index, expected);
        assert!(index.contains("\n\nPackage: b\n"));
        assert!(!index.ends_with("\n\n"));
    }

    #[test]
    fn test_order_is_independent_of_input_order() {
        let make = || {
            vec![
                (PathBuf::from("p/c.deb.package"), record("c", "p/c.deb")),
                (PathBuf::from("p/a.deb.package"), record("a", "p/a.deb")),
                (PathBuf::from("p/b.deb.package"), record("b", "p/b.deb")),
            ]
        };
        let mut forward = make();
        let mut backward = make();
        backward.reverse();
        assert_eq!(assemble(&mut forward), assemble(&mut backward));
    }

    #[test]
    fn test_filename_ties_use_record_name() {
        let mut records = vec![
            (PathBuf::from("p/z.deb.package"), record("second", "p/same.deb")),
            (PathBuf::from("p/a.deb.package"), record("first", "p/same.deb")),
        ];
        let index = String::from_utf8(assemble(&mut records)).unwrap();
        assert!(index.find("Package: first").unwrap() < index.find("Package: second").unwrap());
    }

    #[test]
    fn test_empty_index() {
        assert!(assemble(&mut []).is_empty());
    }

    #[test]
    fn test_compress() {
        let index = b"Package: foo\n";
        let compressed = compress(index, &[Compression::Xz, Compression::Gzip]).unwrap();
        assert_eq!(compressed.len(), 2);
        assert_eq!(compressed[0].0, Compression::Xz);
        assert_eq!(Compression::Xz.decompress(&compressed[0].1).unwrap(), index);
        assert_eq!(Compression::Gzip.decompress(&compressed[1].1).unwrap(), index);
    }

    #[tokio::test]
    async fn test_load_records() {
        let good = record("foo", "packages/foo.deb").to_bytes();
        let mock = MockBackend::with_files([
            ("packages/foo.deb.package", good),
            ("packages/bad.deb.package", b"Package: bad\nVersion: 1\n".to_vec()),
        ]);
        let backend: BackendHandle = Arc::new(mock);
        let paths = vec![
            PathBuf::from("packages/bad.deb.package"),
            PathBuf::from("packages/foo.deb.package"),
            PathBuf::from("packages/vanished.deb.package"),
        ];
        let loaded = load_records(&backend, &layout(), &paths, 2).await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].1.package(), Some("foo"));
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].record, PathBuf::from("packages/bad.deb.package"));
    }

    #[tokio::test]
    async fn test_load_records_storage_failure() {
        let mock = MockBackend::with_files([("packages/foo.deb.package", record("foo", "packages/foo.deb").to_bytes())]);
        mock.fail(Operation::Read, Some("packages/foo.deb.package"), 1);
        let backend: BackendHandle = Arc::new(mock);
        let err = load_records(&backend, &layout(), &[PathBuf::from("packages/foo.deb.package")], 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage(_)));
    }

    #[tokio::test]
    async fn test_load_records_rejects_misnamed_copies() {
        let foo = record("foo", "packages/foo.deb").to_bytes();
        let mock = MockBackend::with_files([
            ("packages/foo.deb.package", foo.clone()),
            ("packages/foo-old.deb.package", foo),
        ]);
        let backend: BackendHandle = Arc::new(mock);
        let paths = vec![PathBuf::from("packages/foo-old.deb.package"), PathBuf::from("packages/foo.deb.package")];
        let loaded = load_records(&backend, &layout(), &paths, 2).await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].0, PathBuf::from("packages/foo.deb.package"));
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].record, PathBuf::from("packages/foo-old.deb.package"));
        assert!(loaded.rejected[0].reason.contains("packages/foo-old.deb"), "{}", loaded.rejected[0].reason);
    }

    #[rstest]
    #[case("packages/foo.deb.package", "packages/foo.deb", true)]
    #[case("packages/foo.deb.package", "packages/bar.deb", false)]
    #[case("packages/foo.deb.package", "foo.deb", false)]
    #[case("packages/foo.deb", "packages/foo.deb", false)]
    fn test_check_filename(#[case] path: &str, #[case] filename: &str, #[case] accepted: bool) {
        let reason = check_filename(&layout(), Path::new(path), &record("foo", filename));
        assert_eq!(reason.is_none(), accepted, "{reason:?}");
    }
}
