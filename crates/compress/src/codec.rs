//! Encoding and decoding.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use exn::ResultExt;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};

// Index files are written once per run and downloaded by every client, so
// size wins over speed. Changing a level changes every published artifact.
const BZIP2_LEVEL: u32 = 9;
const GZIP_LEVEL: u32 = 9;
#[cfg(feature = "xz")]
const XZ_PRESET: u32 = 9;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 19;

impl Compression {
    /// Encode `input` in memory.
    ///
    /// ```
    /// use aptblob_compress::Compression;
    ///
    /// let index = b"Package: foo\nVersion: 1.0\n";
    /// let packed = Compression::Gzip.compress(index).unwrap();
    /// assert_eq!(Compression::Gzip.decompress(&packed).unwrap(), index);
    /// ```
    #[instrument(level = "debug", skip(input), fields(format = %self, input_size = input.len(), output_size))]
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let output = match self {
            Self::None => input.to_vec(),
            Self::Bzip2 => {
                let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::new(BZIP2_LEVEL));
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?
            },
            Self::Gzip => {
                // No file name or timestamp goes into the header.
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::new(GZIP_LEVEL));
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?
            },
            #[cfg(feature = "xz")]
            Self::Xz => {
                let mut encoder = XzEncoder::new(Vec::new(), XZ_PRESET);
                encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                encoder.finish().or_raise(|| ErrorKind::Io)?
            },
            #[cfg(feature = "zstd")]
            Self::Zstd => zstd::encode_all(input, ZSTD_LEVEL).or_raise(|| ErrorKind::Io)?,
        };
        tracing::Span::current().record("output_size", output.len());
        Ok(output)
    }

    /// Decode `input` in memory.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.decoder(input)?.read_to_end(&mut output).or_raise(|| ErrorKind::Corrupt)?;
        Ok(output)
    }

    /// Wrap `reader` so that reading from it yields decoded data.
    ///
    /// Nothing bounds the decoded size; callers reading untrusted input
    /// should cap it with [`Read::take`].
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Bzip2 => Box::new(BzDecoder::new(reader)),
            Self::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Self::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).or_raise(|| ErrorKind::Codec)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use crate::error::ErrorKind;
    use rstest::rstest;
    use std::io::{Cursor, Read};

    const INDEX: &[u8] = b"Package: foo\nVersion: 1.0\nArchitecture: amd64\n\nPackage: bar\nVersion: 2.0\n";

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_decoder_reverses_compress(#[case] compression: Compression) {
        let packed = compression.compress(INDEX).unwrap();
        let mut decoded = Vec::new();
        compression.decoder(Cursor::new(packed)).unwrap().read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, INDEX);
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_output_is_reproducible(#[case] compression: Compression) {
        assert_eq!(compression.compress(INDEX).unwrap(), compression.compress(INDEX).unwrap());
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_corrupt_input(#[case] compression: Compression) {
        let err = compression.decompress(b"This is not compressed data").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt | ErrorKind::Codec));
    }

    #[test]
    fn test_plain_is_passthrough() {
        assert_eq!(Compression::None.compress(INDEX).unwrap(), INDEX);
        assert_eq!(Compression::None.decompress(INDEX).unwrap(), INDEX);
    }

    #[test]
    fn test_decoder_can_be_bounded() {
        let packed = Compression::Gzip.compress(&[b'x'; 4096]).unwrap();
        let mut limited = Vec::new();
        Compression::Gzip.decoder(Cursor::new(packed)).unwrap().take(100).read_to_end(&mut limited).unwrap();
        assert_eq!(limited.len(), 100);
    }
}
