//! Streaming reader for the `ar` container format used by `.deb` files.
//!
//! Only the common (System V / GNU without symbol table) layout is needed:
//! an 8-byte global signature followed by members, each a fixed 60-byte
//! header and a body padded to an even length.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{ErrorKind as IoErrorKind, Read};

pub const SIGNATURE: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;
const TERMINATOR: &[u8; 2] = b"`\n";

/// The parts of a member header that matter here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArHeader {
    pub name: String,
    pub size: u64,
}

/// Reads members from an `ar` archive one at a time without seeking.
pub struct ArReader<R> {
    inner: R,
    /// Unread bytes of the current member body.
    remaining: u64,
    /// Whether the current member is followed by a padding byte.
    padded: bool,
}

impl<R: Read> ArReader<R> {
    /// Check the archive signature and position the reader at the first
    /// member header.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut signature = [0u8; 8];
        let read = read_full(&mut inner, &mut signature)?;
        if read < signature.len() || &signature != SIGNATURE {
            exn::bail!(ErrorKind::NotAnArchive);
        }
        Ok(Self { inner, remaining: 0, padded: false })
    }

    /// Advance to the next member, skipping whatever is left of the current
    /// one. Returns `None` at a clean end of archive.
    pub fn next_header(&mut self) -> Result<Option<ArHeader>> {
        self.skip_body()?;
        let mut raw = [0u8; HEADER_LEN];
        match read_full(&mut self.inner, &mut raw)? {
            0 => return Ok(None),
            HEADER_LEN => {},
            _ => exn::bail!(ErrorKind::MalformedArchive("truncated member header".to_string())),
        }
        if &raw[58..60] != TERMINATOR {
            exn::bail!(ErrorKind::MalformedArchive("bad member header terminator".to_string()));
        }
        let name = parse_name(&raw[0..16])?;
        let size = parse_size(&raw[48..58])?;
        self.remaining = size;
        self.padded = size % 2 == 1;
        Ok(Some(ArHeader { name, size }))
    }

    /// Read the whole body of the current member into memory, refusing
    /// members larger than `limit`.
    pub fn read_body(&mut self, limit: u64) -> Result<Vec<u8>> {
        if self.remaining > limit {
            exn::bail!(ErrorKind::TooLarge { what: "archive member", limit });
        }
        let size = usize::try_from(self.remaining)
            .or_raise(|| ErrorKind::TooLarge { what: "archive member", limit })?;
        let mut body = vec![0u8; size];
        if read_full(&mut self.inner, &mut body)? < size {
            exn::bail!(ErrorKind::MalformedArchive("truncated member body".to_string()));
        }
        self.remaining = 0;
        Ok(body)
    }

    /// Discard the rest of the current member, including its padding.
    pub fn skip_body(&mut self) -> Result<()> {
        if self.remaining > 0 {
            let wanted = self.remaining;
            let skipped = std::io::copy(&mut (&mut self.inner).take(wanted), &mut std::io::sink())
                .or_raise(|| ErrorKind::Io)?;
            if skipped < wanted {
                exn::bail!(ErrorKind::MalformedArchive("truncated member body".to_string()));
            }
            self.remaining = 0;
        }
        if self.padded {
            // The padding after the final member is sometimes omitted; a
            // missing byte here just means the archive ends.
            let mut pad = [0u8; 1];
            read_full(&mut self.inner, &mut pad)?;
            self.padded = false;
        }
        Ok(())
    }
}

/// Fill `buf` as far as the stream allows, returning how many bytes were
/// read. Short counts only happen at end of stream.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        }
    }
    Ok(filled)
}

fn parse_name(raw: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(raw)
        .or_raise(|| ErrorKind::MalformedArchive("member name is not ASCII".to_string()))?
        .trim_end_matches(' ');
    // GNU ar terminates names with a slash.
    let name = name.strip_suffix('/').unwrap_or(name);
    if name.is_empty() {
        exn::bail!(ErrorKind::MalformedArchive("empty member name".to_string()));
    }
    Ok(name.to_string())
}

fn parse_size(raw: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(raw)
        .or_raise(|| ErrorKind::MalformedArchive("member size is not ASCII".to_string()))?
        .trim_end_matches(' ');
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        exn::bail!(ErrorKind::MalformedArchive(format!("member size `{text}` is not a decimal number")));
    }
    text.parse::<u64>()
        .or_raise(|| ErrorKind::MalformedArchive(format!("member size `{text}` is out of range")))
}
