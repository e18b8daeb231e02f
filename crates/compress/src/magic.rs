//! Recognising compressed data by its leading bytes.

use crate::Compression;

const SIGNATURES: &[(Compression, &[u8])] = &[
    (Compression::Bzip2, b"BZh"),
    (Compression::Gzip, &[0x1F, 0x8B]),
    #[cfg(feature = "xz")]
    (Compression::Xz, &[0xFD, b'7', b'z', b'X', b'Z', 0x00]),
    #[cfg(feature = "zstd")]
    (Compression::Zstd, &[0x28, 0xB5, 0x2F, 0xFD]),
];

impl Compression {
    /// Guess the format of `bytes` from its signature. Anything without a
    /// known signature is reported as plain.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Self {
        SIGNATURES
            .iter()
            .find(|(_, signature)| bytes.starts_with(signature))
            .map_or(Self::None, |(compression, _)| *compression)
    }

    /// Whether `bytes` plausibly holds data of this format.
    ///
    /// A member named `control.tar.gz` whose body is not gzip is rejected
    /// before any decoder sees it. Plain data must not carry the signature
    /// of a known format.
    #[must_use]
    pub fn matches_magic(&self, bytes: &[u8]) -> bool {
        Self::sniff(bytes) == *self
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(b"Package: foo\n", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(b"BZh91AY&SY", Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    #[case(&[0x1F], Compression::None)]
    #[cfg_attr(feature = "xz", case(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00, 0x04], Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(&[0x28, 0xB5, 0x2F, 0xFD, 0x00], Compression::Zstd))]
    fn test_sniff(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::sniff(bytes), expected);
    }

    #[rstest]
    #[case(Compression::Gzip, &[0x1F, 0x8B, 0x08], true)]
    #[case(Compression::Gzip, b"BZh9", false)]
    #[case(Compression::None, b"./control", true)]
    #[case(Compression::None, &[0x1F, 0x8B, 0x08], false)]
    fn test_matches_magic(#[case] compression: Compression, #[case] bytes: &[u8], #[case] expected: bool) {
        assert_eq!(compression.matches_magic(bytes), expected);
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_encoder_output_is_recognised(#[case] compression: Compression) {
        let encoded = compression.compress(b"Package: foo\n").unwrap();
        assert!(compression.matches_magic(&encoded));
    }
}
