//! Cache records: one package's paragraph of the package index.

use crate::control::ControlFields;
use crate::error::{ErrorKind, Result};
use crate::hash::Digests;
use exn::ResultExt;

/// Fields that are computed from the archive itself rather than copied from
/// its control file. They always come last in a record, in this order.
pub const COMPUTED_FIELDS: [&str; 5] = ["Filename", "Size", "MD5sum", "SHA1", "SHA256"];

/// Everything the package index needs to know about one package.
///
/// The serialized form is the package's control paragraph followed by the
/// computed fields, ending in a single newline. Its contents depend only on
/// the archive bytes and the blob name, so any two producers of a record for
/// the same package produce identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    control: ControlFields,
    filename: String,
    digests: Digests,
}

impl CacheRecord {
    /// Build a record, dropping any computed fields that the control file
    /// claimed for itself.
    pub fn new(mut control: ControlFields, filename: impl Into<String>, digests: Digests) -> Self {
        for field in COMPUTED_FIELDS {
            if let Some(value) = control.remove(field) {
                tracing::debug!(field, value = %value, "Dropping computed field from control data");
            }
        }
        Self { control, filename: filename.into(), digests }
    }

    /// Parse a serialized record, checking that every computed field is
    /// present and well formed.
    ///
    /// ```
    /// use aptblob_extract::CacheRecord;
    ///
    /// let text = "Package: foo\nVersion: 1.0\nFilename: packages/foo.deb\nSize: 4\n\
    ///     MD5sum: 0123456789abcdef0123456789abcdef\n\
    ///     SHA1: 0123456789abcdef0123456789abcdef01234567\n\
    ///     SHA256: 0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\n";
    /// let record = CacheRecord::parse(text.as_bytes()).unwrap();
    /// assert_eq!(record.filename(), "packages/foo.deb");
    /// assert_eq!(record.to_bytes(), text.as_bytes());
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .or_raise(|| ErrorKind::MalformedControl { line: 0, reason: "record is not valid UTF-8".to_string() })?;
        let mut control = ControlFields::parse(text)?;
        if !control.contains("Package") {
            exn::bail!(ErrorKind::MissingField("Package"));
        }
        let filename = take(&mut control, "Filename")?;
        let size_text = take(&mut control, "Size")?;
        // Leading zeros or a sign would survive parsing but not a round trip.
        let size = match size_text.parse::<u64>() {
            Ok(size) if size.to_string() == size_text => size,
            _ => exn::bail!(ErrorKind::InvalidField { field: "Size", value: size_text }),
        };
        let digests = Digests {
            size,
            md5: hex_field(&mut control, "MD5sum", 32)?,
            sha1: hex_field(&mut control, "SHA1", 40)?,
            sha256: hex_field(&mut control, "SHA256", 64)?,
        };
        Ok(Self { control, filename, digests })
    }

    pub fn control(&self) -> &ControlFields {
        &self.control
    }

    /// The `Package` field.
    pub fn package(&self) -> Option<&str> {
        self.control.get("Package")
    }

    /// Path of the package relative to the repository root.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn digests(&self) -> &Digests {
        &self.digests
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl std::fmt::Display for CacheRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.control)?;
        writeln!(f, "Filename: {}", self.filename)?;
        writeln!(f, "Size: {}", self.digests.size)?;
        writeln!(f, "MD5sum: {}", self.digests.md5)?;
        writeln!(f, "SHA1: {}", self.digests.sha1)?;
        writeln!(f, "SHA256: {}", self.digests.sha256)
    }
}

fn take(control: &mut ControlFields, field: &'static str) -> Result<String> {
    match control.remove(field) {
        Some(value) if !value.is_empty() && !value.contains('\n') => Ok(value),
        Some(value) => exn::bail!(ErrorKind::InvalidField { field, value }),
        None => exn::bail!(ErrorKind::MissingField(field)),
    }
}

fn hex_field(control: &mut ControlFields, field: &'static str, length: usize) -> Result<String> {
    let value = take(control, field)?;
    if value.len() != length || !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        exn::bail!(ErrorKind::InvalidField { field, value });
    }
    Ok(value)
}
