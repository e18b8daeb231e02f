//! Single-pass content digests.
//!
//! The package index advertises MD5, SHA1 and SHA256 of every archive. All
//! three (and the byte count) are computed while the archive streams past,
//! so the bytes are only ever read once.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{Read, Result as IoResult, Write};

/// Size and lowercase hex digests of a package archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digests {
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

impl Digests {
    /// Digest an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = MultiHasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// Computes all supported digests concurrently over one stream of bytes.
#[derive(Clone)]
pub struct MultiHasher {
    md5: md5::Context,
    sha1: Sha1,
    sha256: Sha256,
    size: u64,
}

impl MultiHasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn finalize(self) -> Digests {
        Digests {
            size: self.size,
            md5: format!("{:x}", self.md5.compute()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        }
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MultiHasher {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// A [`Read`] adapter that feeds every byte it yields into a [`MultiHasher`].
///
/// Whatever consumes the reader (an archive parser, [`std::io::copy`]) sees
/// the bytes unchanged; once the stream has been read to the end,
/// [`finish()`](Self::finish) returns the digests of everything that passed
/// through.
pub struct HashingReader<R> {
    inner: R,
    hasher: MultiHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, hasher: MultiHasher::new() }
    }

    /// Bytes seen so far.
    pub fn position(&self) -> u64 {
        self.hasher.size()
    }

    pub fn finish(self) -> Digests {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, sink};

    #[test]
    fn test_known_digests() {
        let digests = Digests::of(b"hello world");
        assert_eq!(digests.size, 11);
        assert_eq!(digests.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(digests.sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(digests.sha256, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn test_empty_input() {
        let digests = Digests::of(b"");
        assert_eq!(digests.size, 0);
        assert_eq!(digests.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digests.sha256, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = MultiHasher::new();
        for chunk in data.chunks(77) {
            hasher.write_all(chunk).unwrap();
        }
        assert_eq!(hasher.finalize(), Digests::of(&data));
    }

    #[test]
    fn test_hashing_reader() {
        let data = b"!<arch>\ndebian-binary   ".repeat(100);
        let mut reader = HashingReader::new(Cursor::new(data.clone()));
        let mut head = [0u8; 8];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"!<arch>\n");
        assert_eq!(reader.position(), 8);
        std::io::copy(&mut reader, &mut sink()).unwrap();
        assert_eq!(reader.finish(), Digests::of(&data));
    }
}
