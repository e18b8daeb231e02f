//! Package inspection for the repository index.
//!
//! Turns the raw bytes of a `.deb` into a [`CacheRecord`]: the control
//! paragraph copied verbatim, plus the filename, size and digests that the
//! package index advertises. Archives are untrusted input, so every stage
//! has a size bound and every structural problem is a typed error rather
//! than a panic.
//!
//! Only the control member is held in memory. The rest of the archive is
//! streamed once through the digest computation.

mod ar;
mod control;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
mod hash;
mod record;

use aptblob_compress::Compression;
use exn::{OptionExt, ResultExt};
use std::io::{Cursor, Read};
use tracing::instrument;

pub use crate::control::ControlFields;
use crate::error::{ErrorKind, Result};
pub use crate::hash::{Digests, HashingReader, MultiHasher};
pub use crate::record::{COMPUTED_FIELDS, CacheRecord};

/// Largest accepted control member, as stored (usually compressed).
pub const MAX_CONTROL_MEMBER: u64 = 16 * 1024 * 1024;
/// Largest accepted control tarball after decompression.
pub const MAX_CONTROL_TARBALL: u64 = 64 * 1024 * 1024;
/// Largest accepted `control` file.
pub const MAX_CONTROL_FILE: u64 = 1024 * 1024;

const DEBIAN_BINARY: &str = "debian-binary";
const CONTROL_MEMBER: &str = "control.tar";

/// Build the cache record for a package archive.
///
/// `filename` is the package's path relative to the repository root; it is
/// recorded as-is in the `Filename` field. The reader is consumed to the
/// end so that the digests cover every byte.
#[instrument(skip(reader))]
pub fn extract<R: Read>(filename: &str, reader: R) -> Result<CacheRecord> {
    if filename.is_empty() || filename.contains(['\n', '\r']) {
        exn::bail!(ErrorKind::InvalidField { field: "Filename", value: filename.to_string() });
    }
    let mut hashing = HashingReader::new(reader);
    let (member, body) = {
        let mut archive = ar::ArReader::new(&mut hashing)?;
        find_control_member(&mut archive)?
    };
    let control = parse_control_member(&member, &body)?;
    if !control.contains("Package") {
        exn::bail!(ErrorKind::MissingField("Package"));
    }
    std::io::copy(&mut hashing, &mut std::io::sink()).or_raise(|| ErrorKind::Io)?;
    let digests = hashing.finish();
    tracing::debug!(size = digests.size, sha256 = %digests.sha256, "Hashed package");
    Ok(CacheRecord::new(control, filename, digests))
}

/// [`extract()`] over an in-memory archive.
pub fn extract_bytes(filename: &str, bytes: &[u8]) -> Result<CacheRecord> {
    extract(filename, Cursor::new(bytes))
}

/// Walk the archive up to the control member and return its name and body.
fn find_control_member<R: Read>(archive: &mut ar::ArReader<R>) -> Result<(String, Vec<u8>)> {
    let first = archive.next_header()?.ok_or_raise(|| ErrorKind::MissingControl)?;
    if first.name != DEBIAN_BINARY {
        exn::bail!(ErrorKind::MalformedArchive(format!("first member is `{}`, not `{DEBIAN_BINARY}`", first.name)));
    }
    let version = archive.read_body(64)?;
    if !version.starts_with(b"2.") {
        exn::bail!(ErrorKind::MalformedArchive(format!(
            "unsupported format version `{}`",
            String::from_utf8_lossy(&version).trim()
        )));
    }
    while let Some(header) = archive.next_header()? {
        if is_control_member(&header.name) {
            let body = archive.read_body(MAX_CONTROL_MEMBER)?;
            return Ok((header.name, body));
        }
        tracing::trace!(member = %header.name, size = header.size, "Skipping archive member");
    }
    exn::bail!(ErrorKind::MissingControl)
}

fn is_control_member(name: &str) -> bool {
    matches!(
        name.strip_prefix(CONTROL_MEMBER),
        Some("" | ".gz" | ".xz" | ".zst" | ".bz2")
    )
}

fn member_compression(member: &str) -> Result<Compression> {
    member
        .strip_prefix(CONTROL_MEMBER)
        .and_then(Compression::from_extension)
        .ok_or_raise(|| ErrorKind::MalformedArchive(format!("unsupported control member `{member}`")))
}

/// Decompress the control tarball and parse its `control` file.
fn parse_control_member(member: &str, body: &[u8]) -> Result<ControlFields> {
    let compression = member_compression(member)?;
    if !compression.matches_magic(body) {
        exn::bail!(ErrorKind::MalformedArchive(format!("`{member}` does not look like {compression} data")));
    }
    let decoder = compression.decoder(body).or_raise(|| ErrorKind::Decompression)?;
    let mut tarball = Vec::new();
    decoder
        .take(MAX_CONTROL_TARBALL + 1)
        .read_to_end(&mut tarball)
        .or_raise(|| ErrorKind::Decompression)?;
    if tarball.len() as u64 > MAX_CONTROL_TARBALL {
        exn::bail!(ErrorKind::TooLarge { what: "control tarball", limit: MAX_CONTROL_TARBALL });
    }

    let mut archive = tar::Archive::new(Cursor::new(tarball));
    for entry in archive.entries().or_raise(|| ErrorKind::Decompression)? {
        let mut entry = entry.or_raise(|| ErrorKind::Decompression)?;
        let is_control = {
            let path = entry.path_bytes();
            matches!(&*path, b"./control" | b"control")
        };
        if !is_control {
            continue;
        }
        if entry.size() > MAX_CONTROL_FILE {
            exn::bail!(ErrorKind::TooLarge { what: "control file", limit: MAX_CONTROL_FILE });
        }
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).or_raise(|| ErrorKind::Decompression)?;
        let text = String::from_utf8(raw)
            .or_raise(|| ErrorKind::MalformedControl { line: 0, reason: "control file is not valid UTF-8".to_string() })?;
        return ControlFields::parse(&text);
    }
    exn::bail!(ErrorKind::MissingControl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{DebBuilder, ar_archive, tarball};
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Gzip)]
    #[case(Compression::Bzip2)]
    #[case(Compression::Xz)]
    #[case(Compression::Zstd)]
    fn test_extract_every_control_compression(#[case] compression: Compression) {
        let deb = DebBuilder::package("foo", "1.0", "amd64").compression(compression).build();
        let record = extract_bytes("packages/foo_1.0_amd64.deb", &deb).unwrap();
        assert_eq!(record.package(), Some("foo"));
        assert_eq!(record.control().get("Version"), Some("1.0"));
        assert_eq!(record.filename(), "packages/foo_1.0_amd64.deb");
        assert_eq!(record.digests(), &Digests::of(&deb));
    }

    #[test]
    fn test_record_contents() {
        let deb = DebBuilder::new("Package: foo\nVersion: 1.0\nArchitecture: amd64\nDescription: demo\n multi\n line\n")
            .data(vec![7u8; 4096])
            .build();
        let record = extract_bytes("packages/foo_1.0_amd64.deb", &deb).unwrap();
        let digests = Digests::of(&deb);
        let expected = format!(
            "Package: foo\nVersion: 1.0\nArchitecture: amd64\nDescription: demo\n multi\n line\n\
             Filename: packages/foo_1.0_amd64.deb\nSize: {}\nMD5sum: {}\nSHA1: {}\nSHA256: {}\n",
            deb.len(),
            digests.md5,
            digests.sha1,
            digests.sha256
        );
        assert_eq!(String::from_utf8(record.to_bytes()).unwrap(), expected);
    }

    #[test]
    fn test_extract_is_pure() {
        let deb = DebBuilder::package("foo", "1.0", "amd64").build();
        let first = extract_bytes("packages/foo.deb", &deb).unwrap().to_bytes();
        let second = extract_bytes("packages/foo.deb", &deb).unwrap().to_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn test_streams_in_small_reads() {
        // A reader that hands out at most three bytes per call.
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(3).min(self.0.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }
        let deb = DebBuilder::package("foo", "1.0", "amd64").data(vec![1u8; 999]).build();
        let record = extract("foo.deb", Trickle(&deb)).unwrap();
        assert_eq!(record.digests(), &Digests::of(&deb));
    }

    #[test]
    fn test_missing_control_member() {
        let deb = DebBuilder::package("foo", "1.0", "amd64").without_control().build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingControl);
    }

    #[test]
    fn test_control_tarball_without_control_file() {
        let control_tar = tarball(&[("./md5sums", b"")]);
        let deb = ar_archive(&[("debian-binary", b"2.0\n"), ("control.tar", &control_tar)]);
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingControl);
    }

    #[rstest]
    #[case(b"3.0\n")]
    #[case(b"")]
    fn test_unsupported_format_version(#[case] version: &[u8]) {
        let deb = DebBuilder::package("foo", "1.0", "amd64").debian_binary(version).build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedArchive(_)));
    }

    #[test]
    fn test_debian_binary_must_come_first() {
        let control_tar = tarball(&[("./control", b"Package: foo\n")]);
        let deb = ar_archive(&[("control.tar", &control_tar), ("debian-binary", b"2.0\n")]);
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedArchive(_)));
    }

    #[test]
    fn test_not_an_archive() {
        let err = extract_bytes("foo.deb", b"Package: foo\n").unwrap_err();
        assert_eq!(*err, ErrorKind::NotAnArchive);
    }

    #[test]
    fn test_corrupt_compression() {
        let mut bogus = Compression::Gzip.compress(b"definitely not a tarball, but valid gzip").unwrap();
        let end = bogus.len();
        bogus[end - 6] ^= 0xFF;
        let deb = ar_archive(&[("debian-binary", b"2.0\n"), ("control.tar.gz", &bogus)]);
        assert!(extract_bytes("foo.deb", &deb).is_err());
    }

    #[test]
    fn test_mislabelled_compression() {
        let control_tar = tarball(&[("./control", b"Package: foo\n")]);
        let deb = ar_archive(&[("debian-binary", b"2.0\n"), ("control.tar.xz", &control_tar)]);
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedArchive(_)));
    }

    #[test]
    fn test_control_requires_package_field() {
        let deb = DebBuilder::new("Version: 1.0\n").build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingField("Package"));
    }

    #[test]
    fn test_unparsable_control() {
        let deb = DebBuilder::new("Package: foo\nthis line has no colon\n").build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedControl { line: 2, .. }));
    }

    #[test]
    fn test_control_must_be_utf8() {
        let deb = DebBuilder::new(b"Package: f\xF6o\n".to_vec()).build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedControl { .. }));
    }

    #[test]
    fn test_oversized_control_file() {
        let mut control = b"Package: foo\nDescription: big\n".to_vec();
        control.extend(std::iter::repeat_n(b" x\n".as_slice(), 400_000).flatten());
        let deb = DebBuilder::new(control).build();
        let err = extract_bytes("foo.deb", &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLarge { what: "control file", .. }));
    }

    #[rstest]
    #[case("")]
    #[case("packages/evil\nPackage: injected.deb")]
    fn test_rejects_unusable_filename(#[case] filename: &str) {
        let deb = DebBuilder::package("foo", "1.0", "amd64").build();
        let err = extract_bytes(filename, &deb).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidField { field: "Filename", .. }));
    }

    #[rstest]
    #[case("control.tar", true)]
    #[case("control.tar.gz", true)]
    #[case("control.tar.zst", true)]
    #[case("control.tar.lz4", false)]
    #[case("data.tar.xz", false)]
    #[case("control", false)]
    fn test_is_control_member(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_control_member(name), expected);
    }
}
