//! Where things live in the container.
//!
//! Package blobs sit under an optional prefix. Each package `X.deb` gets a
//! cache record `X.deb.package` next to it. The index lives at a fixed path
//! (by default `Packages` at the container root) with one sibling per
//! compressed encoding (`Packages.xz`).

use crate::error::{ErrorKind, Result};
use aptblob_compress::Compression;
use aptblob_storage::{to_key, validate_path};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const PACKAGE_SUFFIX: &str = ".deb";
pub const RECORD_SUFFIX: &str = ".package";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    prefix: Option<PathBuf>,
    index: PathBuf,
    compressions: Vec<Compression>,
}

impl Layout {
    /// An empty `prefix` means the whole container.
    pub fn new(prefix: &str, index: &str, compressions: impl IntoIterator<Item = Compression>) -> Result<Self> {
        let prefix = match prefix.trim_matches('/') {
            "" => None,
            prefix => Some(validate_path(prefix).map_err(|err| ErrorKind::Layout((*err).to_string()))?),
        };
        let index = validate_path(index).map_err(|err| ErrorKind::Layout((*err).to_string()))?;
        if has_suffix(&index, PACKAGE_SUFFIX) || has_suffix(&index, RECORD_SUFFIX) {
            exn::bail!(ErrorKind::Layout(format!("index path {} collides with package blobs", index.display())));
        }
        let mut unique = Vec::new();
        for compression in compressions {
            if compression != Compression::None && !unique.contains(&compression) {
                unique.push(compression);
            }
        }
        Ok(Self { prefix, index, compressions: unique })
    }

    pub fn prefix(&self) -> Option<&Path> {
        self.prefix.as_deref()
    }

    /// Whether `path` lies under the package prefix.
    pub fn contains(&self, path: &Path) -> bool {
        match &self.prefix {
            Some(prefix) => path.starts_with(prefix) && path != prefix.as_path(),
            None => true,
        }
    }

    /// A package blob is any `.deb` under the prefix.
    pub fn is_package(&self, path: &Path) -> bool {
        self.contains(path) && has_suffix(path, PACKAGE_SUFFIX)
    }

    pub fn is_record(&self, path: &Path) -> bool {
        self.contains(path) && has_suffix(path, RECORD_SUFFIX)
    }

    /// Name of the cache record for a package blob.
    ///
    /// ```
    /// # use aptblob_repository::Layout;
    /// # use std::path::Path;
    /// let layout = Layout::new("packages", "Packages", []).unwrap();
    /// assert_eq!(
    ///     layout.record_path(Path::new("packages/foo_1.0_amd64.deb")),
    ///     Path::new("packages/foo_1.0_amd64.deb.package"),
    /// );
    /// ```
    pub fn record_path(&self, package: &Path) -> PathBuf {
        let mut name = OsString::from(package.as_os_str());
        name.push(RECORD_SUFFIX);
        PathBuf::from(name)
    }

    /// Name of the package blob a cache record was made from.
    pub fn package_for_record(&self, record: &Path) -> Option<PathBuf> {
        let name = record.to_str()?.strip_suffix(RECORD_SUFFIX)?;
        (!name.is_empty()).then(|| PathBuf::from(name))
    }

    /// The `Filename` a package is advertised under: its blob key.
    pub fn filename(&self, package: &Path) -> Result<String> {
        to_key(package).map_err(|err| ErrorKind::Layout((*err).to_string()).into())
    }

    pub fn index_path(&self) -> &Path {
        &self.index
    }

    pub fn compressions(&self) -> &[Compression] {
        &self.compressions
    }

    /// Every published artifact in publication order: the plain index
    /// first, then each compressed encoding.
    pub fn artifacts(&self) -> Vec<(Compression, PathBuf)> {
        std::iter::once(Compression::None)
            .chain(self.compressions.iter().copied())
            .map(|compression| {
                let mut name = OsString::from(self.index.as_os_str());
                name.push(compression.extension());
                (compression, PathBuf::from(name))
            })
            .collect()
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > suffix.len() && name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn layout() -> Layout {
        Layout::new("packages", "Packages", [Compression::Xz, Compression::Gzip]).unwrap()
    }

    #[rstest]
    #[case("packages/foo_1.0_amd64.deb", true, false)]
    #[case("packages/pool/main/foo_1.0_amd64.deb", true, false)]
    #[case("packages/foo_1.0_amd64.deb.package", false, true)]
    #[case("packages-old/foo_1.0_amd64.deb", false, false)]
    #[case("foo_1.0_amd64.deb", false, false)]
    #[case("packages/foo_1.0_amd64.DEB", false, false)]
    #[case("packages/.deb", false, false)]
    #[case("Packages.xz", false, false)]
    fn test_classification(#[case] path: &str, #[case] package: bool, #[case] record: bool) {
        let layout = layout();
        assert_eq!(layout.is_package(Path::new(path)), package);
        assert_eq!(layout.is_record(Path::new(path)), record);
    }

    #[test]
    fn test_empty_prefix_is_whole_container() {
        let layout = Layout::new("/", "Packages", []).unwrap();
        assert_eq!(layout.prefix(), None);
        assert!(layout.is_package(Path::new("foo.deb")));
        assert!(layout.is_package(Path::new("any/where/foo.deb")));
    }

    #[test]
    fn test_record_round_trip() {
        let layout = layout();
        let package = Path::new("packages/foo_1.0_amd64.deb");
        let record = layout.record_path(package);
        assert_eq!(record, Path::new("packages/foo_1.0_amd64.deb.package"));
        assert_eq!(layout.package_for_record(&record).as_deref(), Some(package));
        assert_eq!(layout.package_for_record(Path::new(".package")), None);
    }

    #[test]
    fn test_filename_is_blob_key() {
        assert_eq!(layout().filename(Path::new("packages/./foo.deb")).unwrap(), "packages/foo.deb");
    }

    #[test]
    fn test_artifacts_plain_first() {
        let artifacts = layout().artifacts();
        let paths: Vec<_> = artifacts.iter().map(|(_, path)| path.to_str().unwrap()).collect();
        assert_eq!(paths, ["Packages", "Packages.xz", "Packages.gz"]);
        assert_eq!(artifacts[0].0, Compression::None);
    }

    #[test]
    fn test_duplicate_and_plain_compressions_are_dropped() {
        let layout = Layout::new("", "dists/stable/main/binary-amd64/Packages", [
            Compression::None,
            Compression::Xz,
            Compression::Xz,
        ])
        .unwrap();
        assert_eq!(layout.compressions(), [Compression::Xz]);
    }

    #[rstest]
    #[case("../escape", "Packages")]
    #[case("", "../Packages")]
    #[case("", "")]
    #[case("", "packages/Packages.deb")]
    fn test_invalid(#[case] prefix: &str, #[case] index: &str) {
        let err = Layout::new(prefix, index, []).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Layout(_)));
    }
}
