//! Compression formats found in Debian repositories.
//!
//! Two places need them: the control member of a `.deb`
//! (`control.tar`, `control.tar.gz`, `control.tar.xz`, ...) has to be
//! decompressed, and the published `Packages` index is offered in one or
//! more compressed encodings next to the plain file.
//!
//! Every format is identified by its file extension, which is also how
//! archive members and index artifacts are named. Bzip2 and Gzip are always
//! built; XZ and Zstd sit behind the `xz` and `zstd` features.
//!
//! Encoder settings are constants: the same index always compresses to the
//! same bytes, so republishing an unchanged index leaves every artifact
//! byte-identical.

mod codec;
pub mod error;
mod magic;

use crate::error::{Error, ErrorKind};
use std::fmt;
use std::str::FromStr;

/// A compression format, or [`None`](Self::None) for plain data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Compression {
    #[default]
    None,
    Bzip2,
    Gzip,
    #[cfg(feature = "xz")]
    Xz,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Compression {
    /// Name used in configuration and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bzip2 => "bzip2",
            Self::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Self::Xz => "xz",
            #[cfg(feature = "zstd")]
            Self::Zstd => "zstd",
        }
    }

    /// Suffix appended to a file name, dot included (`Packages` + `.xz`).
    /// Empty for plain data.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Bzip2 => ".bz2",
            Self::Gzip => ".gz",
            #[cfg(feature = "xz")]
            Self::Xz => ".xz",
            #[cfg(feature = "zstd")]
            Self::Zstd => ".zst",
        }
    }

    /// The format a file name suffix stands for; the inverse of
    /// [`extension()`](Self::extension). Unknown suffixes, and formats left
    /// out of this build, give `None`.
    ///
    /// ```
    /// use aptblob_compress::Compression;
    ///
    /// assert_eq!(Compression::from_extension(".gz"), Some(Compression::Gzip));
    /// assert_eq!(Compression::from_extension(""), Some(Compression::None));
    /// assert_eq!(Compression::from_extension(".lz4"), None);
    /// ```
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "" => Some(Self::None),
            ".bz2" => Some(Self::Bzip2),
            ".gz" => Some(Self::Gzip),
            #[cfg(feature = "xz")]
            ".xz" => Some(Self::Xz),
            #[cfg(feature = "zstd")]
            ".zst" => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the configuration names plus the usual short aliases, case
/// insensitively.
impl FromStr for Compression {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let compression = match name.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "bz2" | "bzip2" => Self::Bzip2,
            "gz" | "gzip" => Self::Gzip,
            #[cfg(feature = "xz")]
            "xz" | "lzma" => Self::Xz,
            #[cfg(feature = "zstd")]
            "zst" | "zstd" => Self::Zstd,
            #[cfg(not(feature = "xz"))]
            "xz" | "lzma" => exn::bail!(ErrorKind::NotBuilt("xz")),
            #[cfg(not(feature = "zstd"))]
            "zst" | "zstd" => exn::bail!(ErrorKind::NotBuilt("zstd")),
            _ => exn::bail!(ErrorKind::Unknown(name.to_string())),
        };
        Ok(compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("none", Compression::None)]
    #[case("bz2", Compression::Bzip2)]
    #[case("BZIP2", Compression::Bzip2)]
    #[case("gz", Compression::Gzip)]
    #[case(" gzip ", Compression::Gzip)]
    #[cfg_attr(feature = "xz", case("xz", Compression::Xz))]
    #[cfg_attr(feature = "xz", case("lzma", Compression::Xz))]
    #[cfg_attr(feature = "zstd", case("zst", Compression::Zstd))]
    #[cfg_attr(feature = "zstd", case("zstd", Compression::Zstd))]
    fn test_parse(#[case] name: &str, #[case] expected: Compression) {
        assert_eq!(name.parse::<Compression>().unwrap(), expected);
    }

    #[rstest]
    #[case("brotli")]
    #[case("")]
    #[case("tar")]
    fn test_parse_unknown(#[case] name: &str) {
        let err = name.parse::<Compression>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unknown(_)));
    }

    #[rstest]
    #[case(Compression::None, "none", "")]
    #[case(Compression::Bzip2, "bzip2", ".bz2")]
    #[case(Compression::Gzip, "gzip", ".gz")]
    #[cfg_attr(feature = "xz", case(Compression::Xz, "xz", ".xz"))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd, "zstd", ".zst"))]
    fn test_names(#[case] compression: Compression, #[case] name: &str, #[case] extension: &str) {
        assert_eq!(compression.to_string(), name);
        assert_eq!(name.parse::<Compression>().unwrap(), compression);
        assert_eq!(compression.extension(), extension);
        assert_eq!(Compression::from_extension(extension), Some(compression));
    }

    #[test]
    fn test_default_is_plain() {
        assert_eq!(Compression::default(), Compression::None);
    }
}
