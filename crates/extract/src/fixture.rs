//! Synthetic `.deb` archives for tests.
//!
//! Builds small, valid (or deliberately broken) package archives entirely in
//! memory. Output is deterministic: every timestamp, owner and mode is
//! fixed, so the same builder settings always produce the same bytes.

use aptblob_compress::Compression;

/// Builder for an in-memory Debian package.
///
/// `DebBuilder::package("foo", "1.0", "amd64").build()` yields an archive
/// that [`extract_bytes()`](crate::extract_bytes) accepts; the other
/// methods break it in specific ways.
#[derive(Debug, Clone)]
pub struct DebBuilder {
    control: Vec<u8>,
    compression: Compression,
    debian_binary: Vec<u8>,
    include_control: bool,
    data: Vec<u8>,
}

impl DebBuilder {
    /// Start from raw control file contents.
    pub fn new(control: impl Into<Vec<u8>>) -> Self {
        Self {
            control: control.into(),
            compression: Compression::Gzip,
            debian_binary: b"2.0\n".to_vec(),
            include_control: true,
            data: Vec::new(),
        }
    }

    /// Start from a minimal, valid control file.
    pub fn package(name: &str, version: &str, architecture: &str) -> Self {
        Self::new(format!(
            "Package: {name}\nVersion: {version}\nArchitecture: {architecture}\n\
             Maintainer: Test Maintainer <test@example.com>\nDescription: test package {name}\n \
             Built for unit tests.\n"
        ))
    }

    /// Compression used for both the control and data members.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn debian_binary(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.debian_binary = contents.into();
        self
    }

    /// Leave out the control member entirely.
    pub fn without_control(mut self) -> Self {
        self.include_control = false;
        self
    }

    /// Payload stored as a file in the data member, to vary archive size.
    pub fn data(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.data = payload.into();
        self
    }

    /// Assemble the archive.
    ///
    /// Panics if compression fails, which only happens for an invalid test
    /// setup.
    pub fn build(&self) -> Vec<u8> {
        let extension = self.compression.extension();
        let mut members: Vec<(String, Vec<u8>)> = vec![("debian-binary".to_string(), self.debian_binary.clone())];
        if self.include_control {
            let control_tar = tarball(&[("./control", &self.control)]);
            members.push((format!("control.tar{extension}"), self.compress(&control_tar)));
        }
        let data_tar = tarball(&[("./usr/share/doc/fixture/payload", &self.data)]);
        members.push((format!("data.tar{extension}"), self.compress(&data_tar)));
        let borrowed: Vec<(&str, &[u8])> = members.iter().map(|(name, body)| (name.as_str(), body.as_slice())).collect();
        ar_archive(&borrowed)
    }

    fn compress(&self, data: &[u8]) -> Vec<u8> {
        match self.compression.compress(data) {
            Ok(compressed) => compressed,
            Err(err) => panic!("DebBuilder: {} compression failed: {err:?}", self.compression),
        }
    }
}

/// Serialize members into an `ar` archive, padding odd-sized bodies.
pub fn ar_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = crate::ar::SIGNATURE.to_vec();
    for (name, body) in members {
        let header = format!("{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n", name, 0, 0, 0, 100644, body.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

/// Serialize files into an uncompressed tarball with fixed metadata.
pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        if let Err(err) = builder.append_data(&mut header, path, *contents) {
            panic!("tarball: failed to append {path}: {err}");
        }
    }
    match builder.into_inner() {
        Ok(bytes) => bytes,
        Err(err) => panic!("tarball: failed to finish archive: {err}"),
    }
}
